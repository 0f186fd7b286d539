// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;
use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::debug;

use crate::domain::StorageError;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if missing) a file-backed database
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        debug!("Connected to {}", database_url);
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema initialization
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let create_states_sql = r"
            CREATE TABLE IF NOT EXISTS product_states (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                price INTEGER NOT NULL DEFAULT 0,
                in_stock BOOLEAN NOT NULL DEFAULT 1,
                first_seen_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL,
                stock_change_count INTEGER NOT NULL DEFAULT 0,
                price_change_count INTEGER NOT NULL DEFAULT 0
            )
        ";

        let create_index_sql = r"
            CREATE INDEX IF NOT EXISTS idx_product_states_last_seen_at ON product_states (last_seen_at)
        ";

        sqlx::query(create_states_sql).execute(&self.pool).await?;
        sqlx::query(create_index_sql).execute(&self.pool).await?;

        Ok(())
    }
}
