//! Snapshot diffing against the state store

#![allow(clippy::uninlined_format_args)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::{DiffResult, PriceChange, Product, ProductState, StorageError};
use crate::infrastructure::state_store::StateStore;

/// Classifies a snapshot against stored states and updates the store.
///
/// Known products missing from the snapshot are left untouched: absence is
/// not evidence of a sell-out. All state changes of one diff are written as
/// a single batch.
#[derive(Clone)]
pub struct DiffEngine {
    store: Arc<StateStore>,
}

impl DiffEngine {
    pub const fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub async fn diff(&self, current: &[Product]) -> Result<DiffResult, StorageError> {
        self.diff_at(current, Utc::now()).await
    }

    /// Diff with an explicit observation time
    pub async fn diff_at(&self, current: &[Product], now: DateTime<Utc>) -> Result<DiffResult, StorageError> {
        let _writer = self.store.lock_writer().await;

        let stored: HashMap<String, ProductState> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .map(|state| (state.id.clone(), state))
            .collect();

        let mut seen = HashSet::with_capacity(current.len());
        let mut pending = Vec::with_capacity(current.len());
        let mut result = DiffResult::default();

        for product in current {
            if !seen.insert(product.id.as_str()) {
                debug!("Skipping duplicate identity {} in snapshot", product.id);
                continue;
            }

            let Some(existing) = stored.get(&product.id) else {
                pending.push(ProductState::first_observed(product, now));
                if product.in_stock {
                    result.new_items.push(product.clone());
                } else {
                    debug!("First sighting of {} while sold out, tracked silently", product.id);
                }
                continue;
            };

            let mut state = existing.clone();
            let previous = state.snapshot();
            let observation = state.observe(product, now);
            pending.push(state);

            if observation.restocked() {
                result.restocked.push(product.clone());
            }
            if observation.sold_out() {
                result.out_of_stock.push(product.clone());
            }
            if observation.price_changed() && product.in_stock {
                result.price_changed.push(PriceChange {
                    old: previous,
                    new: product.clone(),
                });
            }
            if observation.any() {
                result.updated.push(product.clone());
            }
        }

        self.store.upsert_many(&pending).await?;

        info!(
            "🔍 Diff: {} new, {} restocked, {} sold out, {} price changes, {} updated ({} observed)",
            result.new_items.len(),
            result.restocked.len(),
            result.out_of_stock.len(),
            result.price_changed.len(),
            result.updated.len(),
            seen.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::state_store::MemoryBackend;
    use chrono::Duration;

    fn engine() -> DiffEngine {
        DiffEngine::new(Arc::new(StateStore::without_retry(Arc::new(MemoryBackend::new()))))
    }

    fn product(id: &str, price: u64, in_stock: bool) -> Product {
        Product::observed(format!("Item {}", id), format!("https://item.example.jp/shop/{}/", id), price, in_stock)
    }

    #[tokio::test]
    async fn first_sighting_in_stock_is_new() {
        let engine = engine();
        let result = engine.diff(&[product("a", 100, true)]).await.unwrap();
        assert_eq!(result.new_items.len(), 1);
        assert!(result.updated.is_empty());
    }

    #[tokio::test]
    async fn first_sighting_sold_out_is_stored_not_new() {
        let engine = engine();
        let result = engine.diff(&[product("a", 100, false)]).await.unwrap();
        assert!(result.new_items.is_empty());

        let stored = engine.store().get("a").await.unwrap().unwrap();
        assert!(!stored.in_stock);
    }

    #[tokio::test]
    async fn restock_is_detected_once() {
        let engine = engine();
        engine.diff(&[product("a", 100, false)]).await.unwrap();

        let result = engine.diff(&[product("a", 100, true)]).await.unwrap();
        assert_eq!(result.restocked.len(), 1);
        assert!(result.new_items.is_empty());
        assert_eq!(result.updated.len(), 1);

        assert!(engine.diff(&[product("a", 100, true)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sold_out_is_detected() {
        let engine = engine();
        engine.diff(&[product("a", 100, true)]).await.unwrap();

        let result = engine.diff(&[product("a", 100, false)]).await.unwrap();
        assert_eq!(result.out_of_stock.len(), 1);
        assert!(result.restocked.is_empty());
        assert_eq!(engine.store().get("a").await.unwrap().unwrap().stock_change_count, 1);
    }

    #[tokio::test]
    async fn price_change_pairs_old_and_new() {
        let engine = engine();
        engine.diff(&[product("a", 1000, true)]).await.unwrap();

        let result = engine.diff(&[product("a", 1500, true)]).await.unwrap();
        assert_eq!(result.price_changed.len(), 1);
        assert_eq!(result.price_changed[0].old.price, 1000);
        assert_eq!(result.price_changed[0].new.price, 1500);

        let stored = engine.store().get("a").await.unwrap().unwrap();
        assert_eq!(stored.price, 1500);
        assert_eq!(stored.price_change_count, 1);
    }

    #[tokio::test]
    async fn price_change_while_sold_out_is_silent_but_counted() {
        let engine = engine();
        engine.diff(&[product("a", 1000, false)]).await.unwrap();

        let result = engine.diff(&[product("a", 900, false)]).await.unwrap();
        assert!(result.price_changed.is_empty());
        assert_eq!(result.updated.len(), 1);
        assert_eq!(engine.store().get("a").await.unwrap().unwrap().price_change_count, 1);
    }

    #[tokio::test]
    async fn restock_with_new_price_emits_both() {
        let engine = engine();
        engine.diff(&[product("a", 1000, false)]).await.unwrap();

        let result = engine.diff(&[product("a", 1200, true)]).await.unwrap();
        assert_eq!(result.restocked.len(), 1);
        assert_eq!(result.price_changed.len(), 1);
        assert_eq!(result.updated.len(), 1);
    }

    #[tokio::test]
    async fn absent_products_are_untouched() {
        let engine = engine();
        let t0 = Utc::now();
        engine.diff_at(&[product("a", 100, true), product("b", 200, true)], t0).await.unwrap();

        let result = engine.diff_at(&[product("a", 100, true)], t0 + Duration::hours(1)).await.unwrap();
        assert!(result.out_of_stock.is_empty());

        let b = engine.store().get("b").await.unwrap().unwrap();
        assert!(b.in_stock);
        assert_eq!(b.last_seen_at, t0);
    }

    #[tokio::test]
    async fn last_seen_advances_without_changes() {
        let engine = engine();
        let t0 = Utc::now();
        engine.diff_at(&[product("a", 100, true)], t0).await.unwrap();
        engine.diff_at(&[product("a", 100, true)], t0 + Duration::minutes(30)).await.unwrap();

        let a = engine.store().get("a").await.unwrap().unwrap();
        assert_eq!(a.first_seen_at, t0);
        assert_eq!(a.last_seen_at, t0 + Duration::minutes(30));
    }

    #[tokio::test]
    async fn duplicate_identities_count_once() {
        let engine = engine();
        let result = engine.diff(&[product("a", 100, true), product("a", 999, false)]).await.unwrap();
        assert_eq!(result.new_items.len(), 1);
        assert_eq!(engine.store().get("a").await.unwrap().unwrap().price, 100);
    }

    #[tokio::test]
    async fn huge_price_is_stable_in_sqlite() {
        use crate::domain::MAX_PRICE;
        use crate::infrastructure::parsing::text::parse_price;
        use crate::infrastructure::state_store::{SqliteBackend, StateBackend};

        let backend = SqliteBackend::in_memory().await.unwrap();
        backend.init().await.unwrap();
        let engine = DiffEngine::new(Arc::new(StateStore::without_retry(Arc::new(backend))));
        let pricey = product("a", parse_price("99999999999999999999円"), true);

        engine.diff(&[pricey.clone()]).await.unwrap();
        for _ in 0..2 {
            let result = engine.diff(&[pricey.clone()]).await.unwrap();
            assert!(result.price_changed.is_empty());
            assert!(result.updated.is_empty());
        }

        let stored = engine.store().get("a").await.unwrap().unwrap();
        assert_eq!(stored.price, MAX_PRICE);
        assert_eq!(stored.price_change_count, 0);
    }

    #[tokio::test]
    async fn unclamped_observation_matches_stored_price() {
        let engine = engine();
        let mut raw = product("a", 100, true);
        raw.price = u64::MAX;

        engine.diff(&[raw.clone()]).await.unwrap();
        let result = engine.diff(&[raw]).await.unwrap();
        assert!(result.is_empty());
        assert!(result.updated.is_empty());
    }

    #[tokio::test]
    async fn one_batch_write_per_diff() {
        use crate::infrastructure::state_store::StateBackend;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct CountingBackend {
            inner: MemoryBackend,
            single: AtomicUsize,
            batches: AtomicUsize,
        }

        #[async_trait]
        impl StateBackend for CountingBackend {
            fn name(&self) -> &'static str {
                "counting"
            }
            async fn init(&self) -> Result<(), StorageError> {
                Ok(())
            }
            async fn get(&self, id: &str) -> Result<Option<ProductState>, StorageError> {
                self.inner.get(id).await
            }
            async fn get_all(&self) -> Result<Vec<ProductState>, StorageError> {
                self.inner.get_all().await
            }
            async fn upsert(&self, state: &ProductState) -> Result<(), StorageError> {
                self.single.fetch_add(1, Ordering::SeqCst);
                self.inner.upsert(state).await
            }
            async fn upsert_many(&self, states: &[ProductState]) -> Result<(), StorageError> {
                self.batches.fetch_add(1, Ordering::SeqCst);
                self.inner.upsert_many(states).await
            }
            async fn delete(&self, id: &str) -> Result<bool, StorageError> {
                self.inner.delete(id).await
            }
            async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
                self.inner.purge_older_than(cutoff).await
            }
        }

        let backend = Arc::new(CountingBackend::default());
        let engine = DiffEngine::new(Arc::new(StateStore::without_retry(backend.clone())));
        let snapshot: Vec<Product> = (0..40).map(|i| product(&format!("p{}", i), 100, true)).collect();

        let result = engine.diff(&snapshot).await.unwrap();
        assert_eq!(result.new_items.len(), 40);
        assert_eq!(backend.batches.load(Ordering::SeqCst), 1);
        assert_eq!(backend.single.load(Ordering::SeqCst), 0);
        assert_eq!(engine.store().get_all().await.unwrap().len(), 40);
    }
}
