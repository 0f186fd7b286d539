//! Retry schedules, response classification and injectable sleeping
//!
//! Every bounded retry in the monitor (plain HTTP fetch, state store access,
//! alert delivery) is driven by a [`RetrySchedule`] and waits through a
//! [`Sleeper`], so tests can observe the waits without real clocks.

#![allow(clippy::uninlined_format_args)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

/// HTTP statuses worth retrying on the fetch path
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Abstraction over waiting between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested wait
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits requested so far, in order
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Default ceiling for server-provided `Retry-After` waits
pub const DEFAULT_HINT_CEILING: Duration = Duration::from_secs(60);

/// Bounded attempt budget with a delay before each retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    max_attempts: usize,
    delays: Vec<Duration>,
    hint_ceiling: Duration,
}

impl RetrySchedule {
    /// One initial attempt plus one retry per delay
    pub fn from_delays(delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: delays.len() + 1,
            delays,
            hint_ceiling: DEFAULT_HINT_CEILING,
        }
    }

    /// Explicit attempt cap; delays past the end of the list reuse the last one
    pub fn with_max_attempts(max_attempts: usize, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
            hint_ceiling: DEFAULT_HINT_CEILING,
        }
    }

    /// `base * 2^n` for each of `retries` retries
    pub fn exponential(base: Duration, retries: u32) -> Self {
        let delays = (0..retries).map(|n| base.saturating_mul(2_u32.saturating_pow(n))).collect();
        Self::from_delays(delays)
    }

    /// Single attempt, never waits
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            delays: Vec::new(),
            hint_ceiling: DEFAULT_HINT_CEILING,
        }
    }

    /// Longest wait a server `Retry-After` hint may impose
    #[must_use]
    pub fn with_hint_ceiling(mut self, ceiling: Duration) -> Self {
        self.hint_ceiling = ceiling;
        self
    }

    pub const fn hint_ceiling(&self) -> Duration {
        self.hint_ceiling
    }

    /// Wait before the next attempt: the server hint clamped to the ceiling,
    /// or the scheduled delay when there is no hint
    pub fn hinted_wait(&self, hint: Option<Duration>, scheduled: Duration) -> Duration {
        hint.map_or(scheduled, |hint| clamp_retry_after(hint, self.hint_ceiling))
    }

    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay to wait after the given failed attempt (1-based), or `None` when
    /// the budget is spent
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        self.delays
            .get(attempt - 1)
            .or_else(|| self.delays.last())
            .copied()
            .or(Some(Duration::ZERO))
    }
}

/// How a response should be handled by a retrying caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Success,
    /// Transient failure, wait the scheduled delay
    Recoverable,
    /// Server asked to slow down, optionally with its own hint
    RateLimited { retry_after: Option<Duration> },
    /// Retrying will not help
    NonRecoverable,
}

/// Classify a response on the fetch path (429 and 5xx are transient)
pub fn classify_fetch_status(status: u16, retry_after: Option<Duration>) -> ErrorClassification {
    match status {
        200..=299 => ErrorClassification::Success,
        429 => ErrorClassification::RateLimited { retry_after },
        s if RETRYABLE_STATUSES.contains(&s) => ErrorClassification::Recoverable,
        _ => ErrorClassification::NonRecoverable,
    }
}

/// Classify a webhook response: any non-2xx other than 429 is a failed attempt
/// that the delivery schedule retries
pub fn classify_delivery_status(status: u16, retry_after: Option<Duration>) -> ErrorClassification {
    match status {
        200..=299 => ErrorClassification::Success,
        429 => ErrorClassification::RateLimited { retry_after },
        _ => ErrorClassification::Recoverable,
    }
}

/// Parse a `Retry-After` header value given in seconds (fractions allowed)
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Cap a server hint so one response cannot stall a cycle
pub fn clamp_retry_after(hint: Duration, ceiling: Duration) -> Duration {
    if hint > ceiling {
        warn!("⏳ Retry-After of {:?} exceeds ceiling, waiting {:?}", hint, ceiling);
    }
    hint.min(ceiling)
}
