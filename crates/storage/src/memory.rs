//! In-memory results store.

use std::collections::HashMap;

use async_trait::async_trait;
use dqmon_core::{CheckResult, Destination};
use tokio::sync::RwLock;

use super::{Result, ResultFilter, ResultStore};

/// Keeps results in process memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<Destination, Vec<CheckResult>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all tables.
    pub async fn len(&self) -> usize {
        self.tables.read().await.values().map(Vec::len).sum()
    }

    /// Whether nothing has been written.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultStore for MemoryStorage {
    async fn append(&self, destination: &Destination, rows: &[CheckResult]) -> Result<usize> {
        self.tables
            .write()
            .await
            .entry(destination.clone())
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn list(&self, destination: &Destination, filter: &ResultFilter) -> Result<Vec<CheckResult>> {
        let rows = self
            .tables
            .read()
            .await
            .get(destination)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        Ok(filter.finish(rows))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
