//! Error taxonomy for the monitoring pipeline
//!
//! Every component owns one error enum. [`MonitorError`] aggregates them at
//! the orchestration boundary and [`FailureCategory`] maps each onto the
//! categories reported to the metric sink.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories reported to the metric sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Layout,
    Network,
    Storage,
    Notification,
    Configuration,
}

impl FailureCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Layout => "layout",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Notification => "notification",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single fetch strategy within one chain run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub strategy: &'static str,
    /// 1-based position in the chain
    pub index: usize,
    pub elapsed: Duration,
    /// `None` on success, otherwise the failure description
    pub error: Option<String>,
}

impl StrategyAttempt {
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for StrategyAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "#{} {} ok in {:?}", self.index, self.strategy, self.elapsed),
            Some(err) => write!(f, "#{} {} failed in {:?}: {}", self.index, self.strategy, self.elapsed, err),
        }
    }
}

fn summarize_attempts(attempts: &[StrategyAttempt]) -> String {
    attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Fetch chain failures
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Fetch not attempted for '{url}': {reason}")]
    InvalidInput { url: String, reason: String },

    #[error("All fetch strategies exhausted for {url}: {}", summarize_attempts(.attempts))]
    Exhausted {
        url: String,
        attempts: Vec<StrategyAttempt>,
    },
}

impl FetchError {
    pub fn invalid_input(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub const fn category(&self) -> FailureCategory {
        match self {
            Self::InvalidInput { .. } => FailureCategory::Configuration,
            Self::Exhausted { .. } => FailureCategory::Network,
        }
    }
}

/// Kind of page the extractor classified a body as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Listing,
    SingleProduct,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing => f.write_str("listing"),
            Self::SingleProduct => f.write_str("single-product"),
        }
    }
}

/// Extraction failures
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    /// The page passed classification but its required fields could not be
    /// extracted. Treated as evidence that the site markup changed.
    #[error("Layout changed on {page_kind} page: {reason}")]
    LayoutChanged {
        page_kind: PageKind,
        reason: String,
        tried_selectors: Vec<String>,
    },

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl ExtractError {
    pub fn layout_changed(page_kind: PageKind, reason: impl Into<String>, tried_selectors: &[String]) -> Self {
        Self::LayoutChanged {
            page_kind,
            reason: reason.into(),
            tried_selectors: tried_selectors.to_vec(),
        }
    }

    pub const fn category(&self) -> FailureCategory {
        match self {
            Self::LayoutChanged { .. } => FailureCategory::Layout,
            Self::InvalidBaseUrl { .. } => FailureCategory::Configuration,
        }
    }
}

/// State store failures
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Storage operation '{operation}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        last_error: String,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("State serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn backend(err: impl fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub const fn category(&self) -> FailureCategory {
        FailureCategory::Storage
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Alert delivery failures
#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    #[error("Alert delivery failed after {attempts} attempts (last status: {}): {last_body}", .last_status.map_or_else(|| "none".to_string(), |s| s.to_string()))]
    Exhausted {
        attempts: usize,
        /// Last HTTP status seen, `None` when every attempt failed in transport
        last_status: Option<u16>,
        last_body: String,
    },

    #[error("Alert rendering failed: {0}")]
    Render(String),
}

impl NotificationError {
    pub const fn category(&self) -> FailureCategory {
        FailureCategory::Notification
    }
}

/// Missing or invalid settings. Fatal before any network call.
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Missing required setting '{field}'")]
    Missing { field: String },

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ConfigurationError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing { field: field.into() }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Aggregate error seen by the run orchestrator
#[derive(Error, Debug, Clone)]
pub enum MonitorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl MonitorError {
    pub const fn category(&self) -> FailureCategory {
        match self {
            Self::Fetch(err) => err.category(),
            Self::Extract(err) => err.category(),
            Self::Storage(err) => err.category(),
            Self::Notification(err) => err.category(),
            Self::Configuration(_) => FailureCategory::Configuration,
        }
    }

    /// Whether the next cycle may succeed without operator action
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Exhausted { .. }) | Self::Storage(_) | Self::Notification(_))
    }
}
