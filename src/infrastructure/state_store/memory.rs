//! In-memory state backend

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::StateBackend;
use crate::domain::{ProductState, StorageError};

/// Process-local map, lost on exit. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    states: RwLock<HashMap<String, ProductState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ProductState>, StorageError> {
        Ok(self.states.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<ProductState>, StorageError> {
        let mut states: Vec<ProductState> = self.states.read().await.values().cloned().collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(states)
    }

    async fn upsert(&self, state: &ProductState) -> Result<(), StorageError> {
        let mut states = self.states.write().await;
        let mut next = state.clone();
        if let Some(existing) = states.get(&state.id) {
            next.first_seen_at = existing.first_seen_at;
        }
        states.insert(next.id.clone(), next);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.states.write().await.remove(id).is_some())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, state| state.last_seen_at >= cutoff);
        Ok((before - states.len()) as u64)
    }
}
