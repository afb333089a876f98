//! In-process periodic driver for the schedule manager.

use crate::orchestrator::SyncOrchestrator;
use crate::scheduler::ScheduleManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Polls [`ScheduleManager::run_due`] on a fixed tick.
///
/// For deployments without an external cron: spawn `run()` on the runtime
/// and call [`ScheduleRunner::shutdown`] to stop it. Due schedules fire on
/// the next tick after their fire time, so the tick bounds scheduling
/// latency.
pub struct ScheduleRunner {
    manager: Arc<ScheduleManager>,
    orchestrator: Arc<SyncOrchestrator>,
    tick: Duration,
    shutdown: AtomicBool,
}

impl ScheduleRunner {
    /// Creates a runner with a 60-second tick.
    pub fn new(manager: Arc<ScheduleManager>, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            manager,
            orchestrator,
            tick: Duration::from_secs(60),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Sets the tick interval.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Requests the run loop to stop at the next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns true when shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs until shutdown, firing due schedules every tick.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if self.is_shutdown() {
                debug!("schedule runner stopping");
                return;
            }

            match self.manager.run_due(&self.orchestrator) {
                Ok(fired) if fired > 0 => debug!(fired, "schedule tick"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "schedule tick failed"),
            }
        }
    }
}
