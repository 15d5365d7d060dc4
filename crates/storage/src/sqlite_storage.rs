//! SQLite results store.
//!
//! All destination tables share one `check_results` table keyed by
//! `(dataset, table_name)`. Rows are inserted, never replaced.

use async_trait::async_trait;
use dqmon_core::{CheckResult, Destination};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, warn};

use super::trait_::{Result, ResultFilter, ResultStore, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) a database file.
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options)
            .await
            .map_err(backend)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        // A single connection, so every query sees the same in-memory database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS check_results (
                id TEXT PRIMARY KEY,
                dataset TEXT NOT NULL,
                table_name TEXT NOT NULL,
                run_id TEXT NOT NULL,
                check_name TEXT NOT NULL,
                evaluated_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_check_results_dest
             ON check_results(dataset, table_name, evaluated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl ResultStore for SqliteStorage {
    async fn append(&self, destination: &Destination, rows: &[CheckResult]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for row in rows {
            let data = serde_json::to_string(row)?;
            sqlx::query(
                "INSERT INTO check_results (id, dataset, table_name, run_id, check_name, evaluated_at, data)
                VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(row.id.to_string())
            .bind(&destination.dataset)
            .bind(&destination.table)
            .bind(row.run_id.to_string())
            .bind(&row.check_name)
            .bind(row.evaluated_at.to_rfc3339())
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        debug!("Inserted {} rows into {}", rows.len(), destination);
        Ok(rows.len())
    }

    async fn list(&self, destination: &Destination, filter: &ResultFilter) -> Result<Vec<CheckResult>> {
        let records = sqlx::query(
            "SELECT data FROM check_results WHERE dataset = ? AND table_name = ? ORDER BY evaluated_at",
        )
        .bind(&destination.dataset)
        .bind(&destination.table)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut rows = Vec::new();
        for record in records {
            let data: String = record.try_get("data").map_err(backend)?;
            match serde_json::from_str::<CheckResult>(&data) {
                Ok(row) if filter.matches(&row) => rows.push(row),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable row in {}: {}", destination, e),
            }
        }

        Ok(filter.finish(rows))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
