//! JSON file state backend
//!
//! The whole map is kept in memory after the first load and rewritten on
//! every mutation through a temporary file and a rename, so a crash leaves
//! either the old or the new file, never a torn one.

#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::StateBackend;
use crate::domain::{ProductState, StorageError};

type StateMap = BTreeMap<String, ProductState>;

#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    cache: Mutex<Option<StateMap>>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StateMap, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(StateMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, states: &StateMap) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(states)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} states to {:?}", states.len(), self.path);
        Ok(())
    }

    /// Run `f` on the loaded map; the cache is only replaced once `f`'s
    /// changes reached the disk
    async fn mutate<T>(&self, f: impl FnOnce(&mut StateMap) -> T) -> Result<T, StorageError> {
        let mut cache = self.cache.lock().await;
        let mut states = match cache.as_ref() {
            Some(states) => states.clone(),
            None => self.load().await?,
        };
        let result = f(&mut states);
        self.persist(&states).await?;
        *cache = Some(states);
        Ok(result)
    }

    async fn read<T>(&self, f: impl FnOnce(&StateMap) -> T) -> Result<T, StorageError> {
        let mut cache = self.cache.lock().await;
        let states = match cache.take() {
            Some(states) => states,
            None => self.load().await?,
        };
        let result = f(&states);
        *cache = Some(states);
        Ok(result)
    }
}

fn merge_state(states: &mut StateMap, state: &ProductState) {
    let mut next = state.clone();
    if let Some(existing) = states.get(&state.id) {
        next.first_seen_at = existing.first_seen_at;
    }
    states.insert(next.id.clone(), next);
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn init(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let states = self.load().await?;
        debug!("Loaded {} states from {:?}", states.len(), self.path);
        *self.cache.lock().await = Some(states);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ProductState>, StorageError> {
        self.read(|states| states.get(id).cloned()).await
    }

    async fn get_all(&self) -> Result<Vec<ProductState>, StorageError> {
        self.read(|states| states.values().cloned().collect()).await
    }

    async fn upsert(&self, state: &ProductState) -> Result<(), StorageError> {
        self.mutate(|states| merge_state(states, state)).await
    }

    /// Single file rewrite for the whole batch
    async fn upsert_many(&self, batch: &[ProductState]) -> Result<(), StorageError> {
        self.mutate(|states| {
            for state in batch {
                merge_state(states, state);
            }
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        self.mutate(|states| states.remove(id).is_some()).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        self.mutate(|states| {
            let before = states.len();
            states.retain(|_, state| state.last_seen_at >= cutoff);
            (before - states.len()) as u64
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Product;
    use tempfile::tempdir;

    fn state(id: &str, price: u64) -> ProductState {
        let product = Product::observed(id, format!("https://x.jp/s/{}", id), price, true);
        ProductState::first_observed(&product, Utc::now())
    }

    #[tokio::test]
    async fn states_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let backend = JsonFileBackend::new(&path);
        backend.init().await.unwrap();
        backend.upsert(&state("a", 100)).await.unwrap();
        backend.upsert(&state("b", 200)).await.unwrap();
        assert!(backend.delete("b").await.unwrap());

        let reopened = JsonFileBackend::new(&path);
        reopened.init().await.unwrap();
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].price, 100);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn batch_upsert_keeps_first_seen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let backend = JsonFileBackend::new(&path);
        backend.init().await.unwrap();

        let first = state("a", 100);
        backend.upsert(&first).await.unwrap();

        let mut later = state("a", 150);
        later.first_seen_at = first.first_seen_at + chrono::Duration::hours(1);
        later.last_seen_at = later.first_seen_at;
        let batch: Vec<ProductState> = std::iter::once(later)
            .chain((0..50).map(|i| state(&format!("b{}", i), i)))
            .collect();
        backend.upsert_many(&batch).await.unwrap();

        let reopened = JsonFileBackend::new(&path);
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 51);
        let a = reopened.get("a").await.unwrap().unwrap();
        assert_eq!(a.price, 150);
        assert_eq!(a.first_seen_at, first.first_seen_at);
    }

    #[tokio::test]
    async fn missing_and_empty_files_mean_no_states() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(JsonFileBackend::new(&path).get_all().await.unwrap().is_empty());

        std::fs::write(&path, "  \n").unwrap();
        assert!(JsonFileBackend::new(&path).get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFileBackend::new(&path).get_all().await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
