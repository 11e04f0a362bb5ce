//! `GambitServer` builder and server loop.
//!
//! This is the entry point for running a Gambit chess server. It ties
//! together all the layers: transport → protocol → orchestrator → session,
//! plus the sweeps, the persistence worker, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use gambit_protocol::{Codec, JsonCodec, ServerMessage};
use gambit_resilience::{
    ConnectionLimiter, MessageRateLimiter, ShutdownController, ShutdownHooks, ShutdownPhase,
    install_crash_recovery, listen_for_signals, setup_graceful_shutdown,
};
use gambit_session::StandardRules;
use gambit_transport::{Transport, WebSocketTransport};
use tokio::sync::{Mutex, watch};

use crate::GambitError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::orchestrator::Orchestrator;
use crate::persistence::{GameStore, PersistenceQueue};
use crate::sweeper::{SweepHandle, spawn_sweeps};

/// Longest shutdown waits for queued game records to be written.
const PERSISTENCE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// orchestrator sits behind a `Mutex`; the limiters lock internally.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) orchestrator: Arc<Mutex<Orchestrator>>,
    pub(crate) codec: C,
    pub(crate) connections: ConnectionLimiter,
    pub(crate) messages: MessageRateLimiter,
    pub(crate) shutdown: Arc<ShutdownController>,
    pub(crate) idle_timeout: Duration,
    pub(crate) keepalive_interval: Duration,
}

/// Builder for configuring and starting a Gambit server.
///
/// # Example
///
/// ```rust,ignore
/// use gambit::prelude::*;
///
/// let server = GambitServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(Arc::new(MemoryStore::new()))
///     .await?;
/// server.run().await
/// ```
pub struct GambitServerBuilder {
    config: ServerConfig,
    handle_signals: bool,
}

impl GambitServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            handle_signals: true,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration, bind address included.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether SIGINT/SIGTERM start a graceful shutdown. On by default;
    /// embedders and tests that drive shutdown themselves turn it off.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Binds the listener and starts the persistence worker.
    ///
    /// Uses `JsonCodec`, `WebSocketTransport`, and `StandardRules`.
    pub async fn build<S: GameStore>(self, store: Arc<S>) -> Result<GambitServer<JsonCodec>, GambitError> {
        let transport =
            WebSocketTransport::bind(&self.config.bind_addr, self.config.transport.clone()).await?;

        let shutdown = ShutdownController::new();
        let (persistence, _worker) = PersistenceQueue::spawn(store, self.config.persistence_capacity);
        let orchestrator = Orchestrator::new(
            &self.config,
            Arc::new(StandardRules::new()),
            persistence.clone(),
            Arc::clone(&shutdown),
        );

        let state = Arc::new(ServerState {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            codec: JsonCodec,
            connections: ConnectionLimiter::new(self.config.max_connections_per_ip),
            messages: MessageRateLimiter::per_second(self.config.max_messages_per_sec),
            shutdown,
            idle_timeout: self.config.idle_timeout,
            keepalive_interval: self.config.keepalive_interval,
        });

        Ok(GambitServer {
            transport,
            state,
            config: self.config,
            persistence,
            handle_signals: self.handle_signals,
        })
    }
}

impl Default for GambitServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A Gambit chess server, bound and ready.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct GambitServer<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
    config: ServerConfig,
    persistence: PersistenceQueue,
    handle_signals: bool,
}

impl GambitServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> GambitServerBuilder {
        GambitServerBuilder::new()
    }
}

impl<C: Codec> GambitServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The controller that starts a graceful shutdown when
    /// [`request_shutdown`](ShutdownController::request_shutdown) is called.
    pub fn shutdown_handle(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Runs the server until a graceful shutdown has completed.
    ///
    /// Starts the sweeps and the shutdown coordinator, then accepts TCP
    /// sockets and spawns a handler task for each. The WebSocket upgrade
    /// runs in that task, never in this loop. Once shutdown
    /// reaches the closing phase the accept loop stops; `run` returns after
    /// the before-shutdown hook has stopped the sweeps and flushed
    /// persistence.
    pub async fn run(mut self) -> Result<(), GambitError> {
        install_crash_recovery();
        let signals = if self.handle_signals {
            Some(listen_for_signals(Arc::clone(&self.state.shutdown))?)
        } else {
            None
        };

        let sweeps = spawn_sweeps(Arc::clone(&self.state.orchestrator), &self.config.sweeps);
        let active = self.state.orchestrator.lock().await.active_sessions();
        let hooks = ServerHooks {
            orchestrator: Arc::clone(&self.state.orchestrator),
            active,
            sweeps: Mutex::new(Some(sweeps)),
            persistence: self.persistence.clone(),
        };
        let shutdown_task = setup_graceful_shutdown(
            Arc::clone(&self.state.shutdown),
            self.config.shutdown.clone(),
            hooks,
        );

        tracing::info!(addr = %self.config.bind_addr, "Gambit server running");
        let mut phase = self.state.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(incoming) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            // Includes clients that botched or stalled the upgrade.
                            if let Err(e) = handle_connection(incoming, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                _ = wait_for_phase(&mut phase, ShutdownPhase::Closing) => break,
            }
        }

        tracing::info!("no longer accepting connections");
        if let Err(e) = shutdown_task.await {
            tracing::error!(error = %e, "shutdown task failed");
        }
        if let Some(signals) = signals {
            signals.abort();
        }
        Ok(())
    }
}

async fn wait_for_phase(phase: &mut watch::Receiver<ShutdownPhase>, target: ShutdownPhase) {
    let _ = phase.wait_for(|p| *p >= target).await;
}

// ---------------------------------------------------------------------------
// Shutdown hooks
// ---------------------------------------------------------------------------

/// How this server drains, closes, and cleans up.
struct ServerHooks {
    orchestrator: Arc<Mutex<Orchestrator>>,
    active: watch::Receiver<usize>,
    sweeps: Mutex<Option<SweepHandle>>,
    persistence: PersistenceQueue,
}

impl ShutdownHooks for ServerHooks {
    fn broadcast_notice(&self, drain_timeout: Duration) -> impl Future<Output = ()> + Send {
        let drain_timeout_ms = u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX);
        async move {
            self.orchestrator
                .lock()
                .await
                .broadcast(&ServerMessage::ShuttingDown { drain_timeout_ms });
        }
    }

    fn active_sessions(&self) -> watch::Receiver<usize> {
        self.active.clone()
    }

    fn before_shutdown(&self) -> impl Future<Output = ()> + Send {
        async move {
            let sweeps = self.sweeps.lock().await.take();
            if let Some(sweeps) = sweeps {
                sweeps.stop().await;
            }
            self.persistence.flush(PERSISTENCE_FLUSH_TIMEOUT).await;
        }
    }
}
