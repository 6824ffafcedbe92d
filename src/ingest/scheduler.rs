// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::SchedulerSettings;
use crate::pipeline::{PipelineRunner, RunOutcome};

pub fn interval_of(cfg: &SchedulerSettings) -> Duration {
    Duration::from_secs(cfg.run_interval_hours.max(1) * 3600)
}

/// Periodic runs. The first tick fires immediately; a tick that finds a run
/// in progress is skipped rather than queued.
pub fn spawn_scheduler(runner: Arc<PipelineRunner>) -> JoinHandle<()> {
    let every = interval_of(&runner.settings().scheduler);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target: "pipeline", interval_secs = every.as_secs(), "scheduler started");
        loop {
            ticker.tick().await;
            match runner.run_scheduled().await {
                Ok(RunOutcome::Completed(s)) => info!(
                    target: "pipeline",
                    inserted = s.inserted,
                    total_seen = s.total_seen,
                    "scheduled run finished"
                ),
                Ok(other) => info!(target: "pipeline", outcome = %other.message(), "scheduled run skipped"),
                Err(e) => warn!(target: "pipeline", error = %format!("{e:#}"), "scheduled run failed"),
            }
        }
    })
}
