//! JSON-lines file storage implementation.
//!
//! Each destination table is one `<root>/<dataset>/<table>.jsonl` file; every
//! result row is a single line appended to it. Existing lines are never
//! rewritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dqmon_core::{CheckResult, Destination};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Result, ResultFilter, ResultStore};

/// File-based JSON-lines results store.
pub struct JsonLinesStorage {
    root: PathBuf,
    // Serializes appends so concurrent checks never interleave partial lines.
    write_lock: Mutex<()>,
}

impl JsonLinesStorage {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, destination: &Destination) -> PathBuf {
        self.root
            .join(&destination.dataset)
            .join(format!("{}.jsonl", destination.table))
    }
}

#[async_trait]
impl ResultStore for JsonLinesStorage {
    async fn append(&self, destination: &Destination, rows: &[CheckResult]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let path = self.table_path(destination);

        let mut buf = String::new();
        for row in rows {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended {} rows to {}", rows.len(), path.display());
        Ok(rows.len())
    }

    async fn list(&self, destination: &Destination, filter: &ResultFilter) -> Result<Vec<CheckResult>> {
        let path = self.table_path(destination);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut rows = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckResult>(line) {
                Ok(row) if filter.matches(&row) => rows.push(row),
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed line {} in {}: {}", lineno + 1, path.display(), e),
            }
        }

        Ok(filter.finish(rows))
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
