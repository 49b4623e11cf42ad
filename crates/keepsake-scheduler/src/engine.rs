//! Recurring tick driver.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::dispatch::DispatchCoordinator;

/// Invokes the dispatch coordinator on a fixed interval. Tick failures
/// are absorbed inside `run_tick`; this loop never dies.
pub struct SchedulerEngine {
    coordinator: Arc<DispatchCoordinator>,
    tick_interval_secs: u64,
}

impl SchedulerEngine {
    pub fn new(coordinator: Arc<DispatchCoordinator>, tick_interval_secs: u64) -> Self {
        Self {
            coordinator,
            tick_interval_secs: tick_interval_secs.max(1),
        }
    }

    /// Runs indefinitely. Spawn as a tokio task:
    ///
    /// ```ignore
    /// tokio::spawn(engine.run());
    /// ```
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.tick_interval_secs));
        // A slow tick must not cause a burst of catch-up ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.tick_interval_secs, "scheduler started");
        loop {
            interval.tick().await;
            let summary = self.coordinator.run_tick(Utc::now()).await;
            tracing::info!(%summary, "scheduler tick");
        }
    }
}
