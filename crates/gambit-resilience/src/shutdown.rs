//! Graceful shutdown.
//!
//! ```text
//!   Running ──(signal / request)──→ Draining ──(idle or timeout)──→ Closing ──→ Stopped
//! ```
//!
//! - **Draining**: new connections and new pairings are refused with
//!   `SHUTTING_DOWN`, every client gets a shutdown notice, and games in
//!   progress are given up to the drain timeout to finish.
//! - **Closing**: remaining sockets are force-closed and the
//!   before-shutdown hook runs (stop the sweeps, flush persistence).
//! - **Stopped**: the hook has finished; the server loop may return.
//!
//! The phase lives in a `watch` channel so any task can observe it without
//! polling.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ResilienceError;

/// Where the server is in its shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Closing,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Longest the server waits for games in progress to end.
    ///
    /// Default: 30 seconds.
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Owner of the shutdown phase.
#[derive(Debug)]
pub struct ShutdownController {
    phase: watch::Sender<ShutdownPhase>,
    hook_ran: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Arc::new(Self {
            phase,
            hook_ran: AtomicBool::new(false),
        })
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// `true` until shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.phase() == ShutdownPhase::Running
    }

    /// Starts draining. Returns `false` if shutdown was already under way.
    pub fn request_shutdown(&self) -> bool {
        self.advance(ShutdownPhase::Draining)
    }

    /// Moves forward to `next`; phases never go backwards.
    fn advance(&self, next: ShutdownPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase < next {
                *phase = next;
                true
            } else {
                false
            }
        })
    }

    /// Runs `hook` unless a hook has already run on this controller.
    async fn run_hook_once<F: Future<Output = ()>>(&self, hook: F) {
        if self
            .hook_ran
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            hook.await;
        }
    }
}

/// What the server does at each step of the shutdown.
pub trait ShutdownHooks: Send + Sync + 'static {
    /// Tells every connected client the server is going down.
    fn broadcast_notice(&self, drain_timeout: Duration) -> impl Future<Output = ()> + Send;

    /// Number of games still in progress. Draining ends when this hits
    /// zero.
    fn active_sessions(&self) -> watch::Receiver<usize>;

    /// Last work before exit. Runs exactly once.
    fn before_shutdown(&self) -> impl Future<Output = ()> + Send;
}

/// Spawns the task that carries a shutdown request through to the end.
///
/// The task idles until [`ShutdownController::request_shutdown`] is called
/// (by [`listen_for_signals`] or directly), then drains, closes, and runs
/// the before-shutdown hook.
pub fn setup_graceful_shutdown<H: ShutdownHooks>(
    controller: Arc<ShutdownController>,
    config: ShutdownConfig,
    hooks: H,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut phase = controller.subscribe();
        if phase
            .wait_for(|p| *p != ShutdownPhase::Running)
            .await
            .is_err()
        {
            return;
        }

        let drain_timeout = config.drain_timeout;
        info!(?drain_timeout, "shutdown requested, draining");
        hooks.broadcast_notice(drain_timeout).await;

        let mut active = hooks.active_sessions();
        let drained = tokio::time::timeout(drain_timeout, active.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if drained {
            info!("all games finished");
        } else {
            warn!(remaining = *active.borrow(), "drain timed out, closing anyway");
        }

        controller.advance(ShutdownPhase::Closing);
        controller.run_hook_once(hooks.before_shutdown()).await;
        controller.advance(ShutdownPhase::Stopped);
        info!("shutdown complete");
    })
}

/// Requests shutdown on SIGINT or SIGTERM (Ctrl-C elsewhere).
pub fn listen_for_signals(
    controller: Arc<ShutdownController>,
) -> Result<JoinHandle<()>, ResilienceError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
            controller.request_shutdown();
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C");
                controller.request_shutdown();
            }
        }))
    }
}
