//! The three periodic tasks.
//!
//! | Task | Default period | Work |
//! |---|---|---|
//! | `queue-scan` | 5s | queue timeouts, then a match scan |
//! | `session-sweep` | 10s | flag falls, disconnect forfeits, purge of finished games |
//! | `table-sweep` | 30s | expiry of unanswered open tables |
//!
//! Each runs on its own interval, takes the orchestrator lock only for the
//! duration of one tick, and skips ticks it missed rather than bursting to
//! catch up. A panic inside a tick is contained and logged; the task keeps
//! going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gambit_resilience::contain;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::SweepConfig;
use crate::orchestrator::Orchestrator;

/// Running sweep tasks.
#[derive(Debug)]
pub struct SweepHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweepHandle {
    /// Stops every sweep and waits for them to exit.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
        debug!("sweeps stopped");
    }
}

/// Starts the sweeps.
pub fn spawn_sweeps(orchestrator: Arc<Mutex<Orchestrator>>, config: &SweepConfig) -> SweepHandle {
    let (stop, _) = watch::channel(false);
    let tasks = vec![
        spawn_sweep(
            "queue-scan",
            config.queue_scan,
            Arc::clone(&orchestrator),
            stop.subscribe(),
            Orchestrator::queue_tick,
        ),
        spawn_sweep(
            "session-sweep",
            config.session_sweep,
            Arc::clone(&orchestrator),
            stop.subscribe(),
            Orchestrator::session_tick,
        ),
        spawn_sweep(
            "table-sweep",
            config.table_sweep,
            orchestrator,
            stop.subscribe(),
            Orchestrator::table_tick,
        ),
    ];
    SweepHandle { stop, tasks }
}

fn spawn_sweep(
    label: &'static str,
    period: Duration,
    orchestrator: Arc<Mutex<Orchestrator>>,
    mut stop: watch::Receiver<bool>,
    tick: fn(&mut Orchestrator, Instant),
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing is due yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let mut orch = orchestrator.lock().await;
                    // A contained panic is already logged by `contain`.
                    let _ = contain(label, || tick(&mut *orch, Instant::now()));
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(sweep = label, "sweep exited");
    })
}
