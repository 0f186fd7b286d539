//! SQLite state backend (`product_states` table)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};

use super::StateBackend;
use crate::domain::{ProductState, StorageError, clamp_price};
use crate::infrastructure::database_connection::DatabaseConnection;

const SELECT_COLUMNS: &str = "SELECT id, url, name, price, in_stock, first_seen_at, last_seen_at, \
     stock_change_count, price_change_count FROM product_states";

pub struct SqliteBackend {
    db: DatabaseConnection,
}

impl SqliteBackend {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open a file database from a `sqlite:` URL
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        Ok(Self::new(DatabaseConnection::new(database_url).await?))
    }

    pub async fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::new(DatabaseConnection::in_memory().await?))
    }
}

fn to_timestamp(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp out of range: {millis}")))
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn upsert_query(state: &ProductState) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        r"
        INSERT INTO product_states (
            id, url, name, price, in_stock, first_seen_at, last_seen_at,
            stock_change_count, price_change_count
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            url = excluded.url,
            name = excluded.name,
            price = excluded.price,
            in_stock = excluded.in_stock,
            last_seen_at = excluded.last_seen_at,
            stock_change_count = excluded.stock_change_count,
            price_change_count = excluded.price_change_count
        ",
    )
    .bind(&state.id)
    .bind(&state.url)
    .bind(&state.name)
    .bind(i64::try_from(clamp_price(state.price)).unwrap_or(i64::MAX))
    .bind(state.in_stock)
    .bind(state.first_seen_at.timestamp_millis())
    .bind(state.last_seen_at.timestamp_millis())
    .bind(i64::from(state.stock_change_count))
    .bind(i64::from(state.price_change_count))
}

fn map_row(row: &SqliteRow) -> Result<ProductState, StorageError> {
    let price: i64 = row.try_get("price")?;
    Ok(ProductState {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        price: u64::try_from(price).unwrap_or(0),
        in_stock: row.try_get("in_stock")?,
        first_seen_at: to_timestamp(row.try_get("first_seen_at")?)?,
        last_seen_at: to_timestamp(row.try_get("last_seen_at")?)?,
        stock_change_count: to_count(row.try_get("stock_change_count")?),
        price_change_count: to_count(row.try_get("price_change_count")?),
    })
}

#[async_trait]
impl StateBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn init(&self) -> Result<(), StorageError> {
        self.db.migrate().await
    }

    async fn get(&self, id: &str) -> Result<Option<ProductState>, StorageError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(map_row).transpose()
    }

    async fn get_all(&self) -> Result<Vec<ProductState>, StorageError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(map_row).collect()
    }

    async fn upsert(&self, state: &ProductState) -> Result<(), StorageError> {
        upsert_query(state).execute(self.db.pool()).await?;
        Ok(())
    }

    async fn upsert_many(&self, states: &[ProductState]) -> Result<(), StorageError> {
        let mut tx = self.db.pool().begin().await?;
        for state in states {
            upsert_query(state).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM product_states WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM product_states WHERE last_seen_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Product;
    use chrono::{Duration, TimeZone};

    async fn backend() -> SqliteBackend {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend.init().await.unwrap();
        backend
    }

    fn state(id: &str, at: DateTime<Utc>) -> ProductState {
        let product = Product::observed(format!("Item {id}"), format!("https://x.jp/s/{id}"), 1980, true);
        ProductState::first_observed(&product, at)
    }

    #[tokio::test]
    async fn round_trips_every_field() {
        let backend = backend().await;
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let mut original = state("a1", at);
        original.in_stock = false;
        original.stock_change_count = 3;
        original.price_change_count = 2;

        backend.upsert(&original).await.unwrap();
        assert_eq!(backend.get("a1").await.unwrap(), Some(original));
        assert!(backend.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflict_updates_but_keeps_first_seen() {
        let backend = backend().await;
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        backend.upsert(&state("a1", first)).await.unwrap();

        let mut later = state("a1", first + Duration::days(2));
        later.price = 2480;
        later.price_change_count = 1;
        backend.upsert(&later).await.unwrap();

        let stored = backend.get("a1").await.unwrap().unwrap();
        assert_eq!(stored.first_seen_at, first);
        assert_eq!(stored.last_seen_at, first + Duration::days(2));
        assert_eq!(stored.price, 2480);
        assert_eq!(stored.price_change_count, 1);
        assert_eq!(backend.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_and_purge() {
        let backend = backend().await;
        let now = Utc::now();
        backend.upsert(&state("old", now - Duration::days(90))).await.unwrap();
        backend.upsert(&state("new", now)).await.unwrap();
        backend.upsert(&state("gone", now)).await.unwrap();

        assert!(backend.delete("gone").await.unwrap());
        assert!(!backend.delete("gone").await.unwrap());
        assert_eq!(backend.purge_older_than(now - Duration::days(30)).await.unwrap(), 1);

        let ids: Vec<String> = backend.get_all().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["new".to_string()]);
    }
}
