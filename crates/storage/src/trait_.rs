//! Results store trait abstraction.

use async_trait::async_trait;
use dqmon_core::{CheckResult, Destination, RunId, Time};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend rejected the write or read
    #[error("backend error: {0}")]
    Backend(String),
}

/// Filter for reading results back.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    /// Only rows from this check
    pub check_name: Option<String>,

    /// Only rows from this run
    pub run_id: Option<RunId>,

    /// Only rows evaluated at or after this time
    pub since: Option<Time>,

    /// Keep only the newest N rows
    pub limit: Option<usize>,
}

impl ResultFilter {
    /// Whether a row matches every set criterion except `limit`.
    pub fn matches(&self, result: &CheckResult) -> bool {
        self.check_name.as_ref().map_or(true, |n| &result.check_name == n)
            && self.run_id.map_or(true, |id| result.run_id == id)
            && self.since.map_or(true, |t| result.evaluated_at >= t)
    }

    /// Sort by evaluation time and apply `limit`, keeping the newest rows.
    pub fn finish(&self, mut rows: Vec<CheckResult>) -> Vec<CheckResult> {
        rows.sort_by(|a, b| a.evaluated_at.cmp(&b.evaluated_at));
        if let Some(limit) = self.limit {
            let skip = rows.len().saturating_sub(limit);
            rows.drain(..skip);
        }
        rows
    }
}

/// Append-only store for check results.
///
/// Implementations never update or delete rows; re-running a check appends
/// duplicates by design.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append rows to a destination table, returning how many were written.
    async fn append(&self, destination: &Destination, rows: &[CheckResult]) -> Result<usize>;

    /// Read rows back from a destination table, oldest first.
    async fn list(&self, destination: &Destination, filter: &ResultFilter) -> Result<Vec<CheckResult>>;

    /// Backend name, for logging.
    fn name(&self) -> &str;
}
