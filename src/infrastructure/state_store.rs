//! Persistent product state store
//!
//! One [`StateBackend`] trait with three injected implementations (in-memory
//! map, JSON file, SQLite). [`StateStore`] wraps any backend with a bounded
//! retry and owns the writer lock that serializes diff runs.

#![allow(clippy::uninlined_format_args)]

pub mod json_file;
pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::domain::{ProductState, StorageError};
use crate::infrastructure::config::{StorageBackendKind, StorageConfig};
use crate::infrastructure::retry_manager::{RetrySchedule, Sleeper, TokioSleeper};

pub use json_file::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Raw storage operations. Implementations report single failures; retrying
/// is the job of [`StateStore`].
#[async_trait]
pub trait StateBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Idempotent initialization (schema, files)
    async fn init(&self) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<ProductState>, StorageError>;

    async fn get_all(&self) -> Result<Vec<ProductState>, StorageError>;

    /// Insert or replace the state for `state.id`. An existing first-seen
    /// timestamp is kept.
    async fn upsert(&self, state: &ProductState) -> Result<(), StorageError>;

    /// Upsert a batch with the same per-state semantics as [`Self::upsert`]
    async fn upsert_many(&self, states: &[ProductState]) -> Result<(), StorageError> {
        for state in states {
            self.upsert(state).await?;
        }
        Ok(())
    }

    /// Returns whether a state was removed
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// Delete states last seen before `cutoff`, returning how many went
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Backend plus retry policy and run exclusion
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    retry: RetrySchedule,
    sleeper: Arc<dyn Sleeper>,
    writer: Mutex<()>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StateBackend>, retry: RetrySchedule, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            backend,
            retry,
            sleeper,
            writer: Mutex::new(()),
        }
    }

    /// Store with the configured retry budget and the tokio timer
    pub fn with_config(backend: Arc<dyn StateBackend>, config: &StorageConfig) -> Self {
        let retry = RetrySchedule::with_max_attempts(config.retry_attempts, config.retry_delays());
        Self::new(backend, retry, Arc::new(TokioSleeper))
    }

    /// Single attempt, no waits
    pub fn without_retry(backend: Arc<dyn StateBackend>) -> Self {
        Self::new(backend, RetrySchedule::none(), Arc::new(TokioSleeper))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Exclusive writer access for one diff run
    pub async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        self.with_retry("init", || self.backend.init()).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProductState>, StorageError> {
        self.with_retry("get", || self.backend.get(id)).await
    }

    pub async fn get_all(&self) -> Result<Vec<ProductState>, StorageError> {
        self.with_retry("get_all", || self.backend.get_all()).await
    }

    pub async fn upsert(&self, state: &ProductState) -> Result<(), StorageError> {
        self.with_retry("upsert", || self.backend.upsert(state)).await
    }

    /// One backend write for a whole batch; retried as a unit
    pub async fn upsert_many(&self, states: &[ProductState]) -> Result<(), StorageError> {
        if states.is_empty() {
            return Ok(());
        }
        self.with_retry("upsert_many", || self.backend.upsert_many(states)).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.with_retry("delete", || self.backend.delete(id)).await
    }

    /// Remove states not seen within `horizon`
    pub async fn purge_stale(&self, horizon: Duration) -> Result<u64, StorageError> {
        let horizon = chrono::Duration::from_std(horizon).map_err(StorageError::backend)?;
        let cutoff = Utc::now() - horizon;
        let _writer = self.lock_writer().await;
        let removed = self.with_retry("purge", || self.backend.purge_older_than(cutoff)).await?;
        info!("🧹 Purged {} stale product states (last seen before {})", removed, cutoff);
        Ok(removed)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        warn!(
                            "⏳ Storage {} failed on {} (attempt {}/{}), retrying in {:?}: {}",
                            operation,
                            self.backend.name(),
                            attempt,
                            self.retry.max_attempts(),
                            delay,
                            err
                        );
                        self.sleeper.sleep(delay).await;
                    }
                    None => {
                        return Err(StorageError::Exhausted {
                            operation,
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                },
            }
        }
    }
}

/// Build and initialize the configured backend
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StateBackend>, StorageError> {
    let backend: Arc<dyn StateBackend> = match config.backend {
        StorageBackendKind::Memory => Arc::new(MemoryBackend::new()),
        StorageBackendKind::Json => Arc::new(JsonFileBackend::new(config.resolved_path())),
        StorageBackendKind::Sqlite => {
            let url = format!("sqlite:{}", config.resolved_path().to_string_lossy());
            Arc::new(SqliteBackend::connect(&url).await?)
        }
    };
    backend.init().await?;
    info!("✅ State backend ready: {}", backend.name());
    Ok(backend)
}
