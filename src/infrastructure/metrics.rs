//! Metric sink collaborator
//!
//! The monitor reports failures and run summaries through [`MetricSink`].
//! Sink calls return a result so callers can log a failing sink, but a sink
//! error never fails a run.

#![allow(clippy::uninlined_format_args)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{FailureCategory, StrategyAttempt};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Metric sink unavailable: {0}")]
pub struct MetricSinkError(pub String);

pub trait MetricSink: Send + Sync {
    fn record_failure(&self, category: FailureCategory, detail: &str) -> Result<(), MetricSinkError>;

    fn record_run(&self, items_processed: usize, changes_found: usize, duration: Duration) -> Result<(), MetricSinkError>;

    /// One fetch strategy outcome
    fn record_fetch_attempt(&self, _attempt: &StrategyAttempt) -> Result<(), MetricSinkError> {
        Ok(())
    }

    /// Same failure category for `consecutive` runs in a row on `url`
    fn record_sustained_failure(&self, category: FailureCategory, url: &str, consecutive: u32)
    -> Result<(), MetricSinkError>;
}

/// Log a failed sink call; sink errors never propagate
pub fn log_sink_error(result: Result<(), MetricSinkError>, metric: &str) {
    if let Err(err) = result {
        warn!("⚠️ Metric '{}' dropped: {}", metric, err);
    }
}

/// Sink that writes metrics as structured log events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricSink;

impl MetricSink for TracingMetricSink {
    fn record_failure(&self, category: FailureCategory, detail: &str) -> Result<(), MetricSinkError> {
        warn!(metric = "failure", category = category.as_str(), detail, "📉 Failure recorded");
        Ok(())
    }

    fn record_run(&self, items_processed: usize, changes_found: usize, duration: Duration) -> Result<(), MetricSinkError> {
        info!(
            metric = "run",
            items_processed,
            changes_found,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "📊 Run recorded"
        );
        Ok(())
    }

    fn record_fetch_attempt(&self, attempt: &StrategyAttempt) -> Result<(), MetricSinkError> {
        info!(
            metric = "fetch_attempt",
            strategy = attempt.strategy,
            index = attempt.index,
            success = attempt.succeeded(),
            elapsed_ms = u64::try_from(attempt.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Fetch attempt recorded"
        );
        Ok(())
    }

    fn record_sustained_failure(
        &self,
        category: FailureCategory,
        url: &str,
        consecutive: u32,
    ) -> Result<(), MetricSinkError> {
        warn!(
            metric = "sustained_failure",
            category = category.as_str(),
            url,
            consecutive,
            "🚨 Sustained failure, maintenance needed"
        );
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn record_failure(&self, _category: FailureCategory, _detail: &str) -> Result<(), MetricSinkError> {
        Ok(())
    }

    fn record_run(&self, _items: usize, _changes: usize, _duration: Duration) -> Result<(), MetricSinkError> {
        Ok(())
    }

    fn record_sustained_failure(&self, _category: FailureCategory, _url: &str, _consecutive: u32) -> Result<(), MetricSinkError> {
        Ok(())
    }
}

/// Everything a [`RecordingMetricSink`] saw
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedMetrics {
    pub failures: Vec<(FailureCategory, String)>,
    /// (items processed, changes found)
    pub runs: Vec<(usize, usize)>,
    pub fetch_attempts: Vec<(&'static str, bool)>,
    pub sustained: Vec<(FailureCategory, String, u32)>,
}

/// In-memory sink for tests and dry runs. Can be switched to failing mode to
/// simulate an unreachable backend.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetricSink {
    recorded: Arc<Mutex<RecordedMetrics>>,
    unavailable: bool,
}

impl RecordingMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every call
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> RecordedMetrics {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut RecordedMetrics)) -> Result<(), MetricSinkError> {
        if self.unavailable {
            return Err(MetricSinkError("sink offline".into()));
        }
        let mut recorded = self
            .recorded
            .lock()
            .map_err(|e| MetricSinkError(e.to_string()))?;
        f(&mut recorded);
        Ok(())
    }
}

impl MetricSink for RecordingMetricSink {
    fn record_failure(&self, category: FailureCategory, detail: &str) -> Result<(), MetricSinkError> {
        self.record(|r| r.failures.push((category, detail.to_string())))
    }

    fn record_run(&self, items_processed: usize, changes_found: usize, _duration: Duration) -> Result<(), MetricSinkError> {
        self.record(|r| r.runs.push((items_processed, changes_found)))
    }

    fn record_fetch_attempt(&self, attempt: &StrategyAttempt) -> Result<(), MetricSinkError> {
        self.record(|r| r.fetch_attempts.push((attempt.strategy, attempt.succeeded())))
    }

    fn record_sustained_failure(&self, category: FailureCategory, url: &str, consecutive: u32) -> Result<(), MetricSinkError> {
        self.record(|r| r.sustained.push((category, url.to_string(), consecutive)))
    }
}
