//! Fixed-interval scheduling of monitoring cycles
//!
//! Cycles run on a single task so they never overlap. A cycle's own failures
//! are contained in its report and never stop the loop.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::monitor::{CycleOutcome, Monitor};

/// Interval between retention purges
pub const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub completed: u64,
    pub skipped: u64,
    pub purges: u64,
}

impl SchedulerSummary {
    pub const fn runs(&self) -> u64 {
        self.completed + self.skipped
    }
}

pub struct Scheduler {
    monitor: Arc<Monitor>,
    interval: Duration,
    retention: Option<Duration>,
    max_runs: Option<u64>,
}

impl Scheduler {
    pub const fn new(monitor: Arc<Monitor>, interval: Duration) -> Self {
        Self {
            monitor,
            interval,
            retention: None,
            max_runs: None,
        }
    }

    /// Purge states unseen for `retention`, once per day
    #[must_use]
    pub const fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Stop after this many ticks, skipped ones included
    #[must_use]
    pub const fn with_max_runs(mut self, max_runs: u64) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Run until cancelled or `max_runs` is reached
    pub async fn run(&self, cancel: CancellationToken) -> SchedulerSummary {
        let mut summary = SchedulerSummary::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_purge: Option<Instant> = None;

        info!("⏰ Scheduler started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("🛑 Cycle interrupted by shutdown");
                    break;
                }
                outcome = self.monitor.run_cycle() => outcome,
            };

            match outcome {
                CycleOutcome::Completed(_) => summary.completed += 1,
                CycleOutcome::Skipped => summary.skipped += 1,
            }

            if self.purge_due(last_purge) {
                self.purge().await;
                last_purge = Some(Instant::now());
                summary.purges += 1;
            }

            if self.max_runs.is_some_and(|max| summary.runs() >= max) {
                break;
            }
        }

        info!(
            "⏹️ Scheduler stopped: {} cycles completed, {} skipped",
            summary.completed, summary.skipped
        );
        summary
    }

    fn purge_due(&self, last_purge: Option<Instant>) -> bool {
        self.retention.is_some() && last_purge.is_none_or(|at| at.elapsed() >= PURGE_INTERVAL)
    }

    async fn purge(&self) {
        let Some(retention) = self.retention else {
            return;
        };
        if let Err(err) = self.monitor.diff_engine().store().purge_stale(retention).await {
            error!("❌ Retention purge failed: {}", err);
        }
    }
}
