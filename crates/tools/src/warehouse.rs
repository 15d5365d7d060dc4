//! Warehouse access through the `bq` command-line client.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dqmon_core::{value_as_f64, CheckResult, Destination, Row};
use dqmon_storage::{ResultFilter, ResultStore, StorageError};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::r#trait::{ToolExecutor, ToolInput, ToolOutput};

/// Errors talking to the warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The warehouse rejected the statement
    #[error("query failed: {message}")]
    Query {
        /// Error text reported by the warehouse
        message: String,
    },

    /// The CLI could not be run or timed out
    #[error("warehouse tool failed: {0}")]
    Tool(#[from] anyhow::Error),

    /// Output was not the expected JSON
    #[error("could not decode warehouse output: {0}")]
    Decode(String),
}

/// A data warehouse that runs SQL and returns tabular rows.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a query and return its rows.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError>;

    /// Run a statement whose result set is not needed (DDL).
    async fn execute(&self, sql: &str) -> Result<(), WarehouseError>;

    /// Warehouse name, for logging.
    fn name(&self) -> &str;
}

/// Column schema of result tables, in `bq load` inline form.
pub const RESULT_SCHEMA: &str = "id:STRING,run_id:STRING,check_name:STRING,subject:STRING,\
measured_value:FLOAT,threshold:FLOAT,passed:BOOLEAN,evaluated_at:TIMESTAMP,row:STRING";

/// Warehouse backed by the `bq` CLI.
#[derive(Clone)]
pub struct BqWarehouse {
    executor: Arc<dyn ToolExecutor>,
    project_id: String,
    location: Option<String>,
    timeout: Duration,
    max_rows: usize,
}

impl BqWarehouse {
    /// Tool name the executor must provide.
    pub const TOOL: &'static str = "bq";

    /// Create a warehouse client for `project_id`. An empty id leaves the
    /// project to the CLI's own configuration.
    pub fn new(executor: Arc<dyn ToolExecutor>, project_id: impl Into<String>) -> Self {
        Self {
            executor,
            project_id: project_id.into(),
            location: None,
            timeout: Duration::from_secs(600),
            max_rows: 10_000,
        }
    }

    /// Set the job location (`US`, `EU`, ...).
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the per-statement timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum rows returned by a query.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Project the client runs jobs in.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.project_id.is_empty() {
            args.push(format!("--project_id={}", self.project_id));
        }
        if let Some(location) = &self.location {
            args.push(format!("--location={}", location));
        }
        args.push("--format=json".to_string());
        args
    }

    fn query_input(&self, sql: &str) -> ToolInput {
        let mut args = self.global_args();
        args.extend([
            "query".to_string(),
            "--nouse_legacy_sql".to_string(),
            format!("--max_rows={}", self.max_rows),
            sql.to_string(),
        ]);
        ToolInput {
            args,
            timeout: Some(self.timeout),
            ..Default::default()
        }
    }

    /// `bq query` stops at `--max_rows` without reporting it.
    fn hit_row_limit(&self, rows: usize) -> bool {
        self.max_rows > 0 && rows >= self.max_rows
    }

    fn table_ref(&self, destination: &Destination) -> String {
        if self.project_id.is_empty() {
            return destination.qualified();
        }
        format!("{}:{}.{}", self.project_id, destination.dataset, destination.table)
    }

    async fn run(&self, input: ToolInput) -> Result<ToolOutput, WarehouseError> {
        let output = self.executor.execute_tool(Self::TOOL, input).await?;
        if !output.success() {
            // bq reports most errors on stdout.
            let message = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(WarehouseError::Query { message });
        }
        Ok(output)
    }
}

#[async_trait]
impl Warehouse for BqWarehouse {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        debug!("bq query ({} bytes)", sql.len());
        let output = self.run(self.query_input(sql)).await?;
        let rows = parse_rows(&output.stdout)?;
        if self.hit_row_limit(rows.len()) {
            warn!(
                "Query returned {} rows, the configured maximum; later rows were dropped",
                rows.len()
            );
        }
        Ok(rows)
    }

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        debug!("bq statement ({} bytes)", sql.len());
        self.run(self.query_input(sql)).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "bigquery"
    }
}

#[async_trait]
impl ResultStore for BqWarehouse {
    async fn append(&self, destination: &Destination, rows: &[CheckResult]) -> dqmon_storage::Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        // `bq load` appends and creates the table on first use, unlike the
        // streaming `bq insert`.
        let mut file = tempfile::Builder::new()
            .prefix("dqmon-results-")
            .suffix(".ndjson")
            .tempfile()?;
        for row in rows {
            serde_json::to_writer(&mut file, &to_record(row)?)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;

        let mut args = self.global_args();
        args.extend([
            "load".to_string(),
            "--source_format=NEWLINE_DELIMITED_JSON".to_string(),
            self.table_ref(destination),
            file.path().display().to_string(),
            RESULT_SCHEMA.to_string(),
        ]);
        let input = ToolInput {
            args,
            timeout: Some(self.timeout),
            ..Default::default()
        };

        self.run(input)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        debug!("Loaded {} rows into {}", rows.len(), destination);
        Ok(rows.len())
    }

    async fn list(&self, destination: &Destination, filter: &ResultFilter) -> dqmon_storage::Result<Vec<CheckResult>> {
        let table = if self.project_id.is_empty() {
            destination.qualified()
        } else {
            format!("{}.{}", self.project_id, destination.qualified())
        };
        let mut sql = format!("SELECT * FROM `{}`", table);
        if let Some(check) = &filter.check_name {
            sql.push_str(&format!(" WHERE check_name = '{}'", check.replace('\'', "\\'")));
        }
        sql.push_str(" ORDER BY evaluated_at");

        let rows = self
            .query(&sql)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut results = Vec::new();
        for row in &rows {
            match from_record(row) {
                Ok(result) if filter.matches(&result) => results.push(result),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable row in {}: {}", destination, e),
            }
        }
        Ok(filter.finish(results))
    }

    fn name(&self) -> &str {
        "bigquery"
    }
}

/// Parse `bq --format=json` query output.
pub fn parse_rows(stdout: &str) -> Result<Vec<Row>, WarehouseError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| WarehouseError::Decode(e.to_string()))?;

    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(WarehouseError::Decode(format!("expected object row, got {}", other))),
            })
            .collect(),
        other => Err(WarehouseError::Decode(format!("expected array of rows, got {}", other))),
    }
}

/// Flatten a result into an insertable record; the raw row becomes a JSON string.
fn to_record(result: &CheckResult) -> Result<Value, serde_json::Error> {
    Ok(serde_json::json!({
        "id": result.id.to_string(),
        "run_id": result.run_id.to_string(),
        "check_name": result.check_name,
        "subject": result.subject,
        "measured_value": result.measured_value,
        "threshold": result.threshold,
        "passed": result.passed,
        "evaluated_at": result.evaluated_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        "row": serde_json::to_string(&result.row)?,
    }))
}

fn text<'a>(row: &'a Row, key: &str) -> Result<&'a str, String> {
    row.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing column `{}`", key))
}

fn from_record(row: &Row) -> Result<CheckResult, String> {
    let passed = match row.get("passed") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => return Err("missing column `passed`".to_string()),
    };

    let raw = match row.get("row") {
        Some(Value::String(s)) => serde_json::from_str(s).map_err(|e| e.to_string())?,
        Some(Value::Object(map)) => map.clone(),
        _ => Row::new(),
    };

    Ok(CheckResult {
        id: text(row, "id")?.parse().map_err(|e| format!("bad id: {}", e))?,
        run_id: text(row, "run_id")?.parse().map_err(|e| format!("bad run_id: {}", e))?,
        check_name: text(row, "check_name")?.to_string(),
        subject: row.get("subject").and_then(Value::as_str).map(str::to_string),
        measured_value: row
            .get("measured_value")
            .and_then(value_as_f64)
            .ok_or("missing column `measured_value`")?,
        threshold: row.get("threshold").and_then(value_as_f64),
        passed,
        evaluated_at: parse_timestamp(text(row, "evaluated_at")?)?,
        row: raw,
    })
}

/// Accept RFC 3339 and the `YYYY-MM-DD HH:MM:SS[.ffffff]` form bq prints.
fn parse_timestamp(s: &str) -> Result<dqmon_core::Time, String> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&chrono::Utc));
    }
    let trimmed = s.trim_end_matches(" UTC");
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("bad timestamp `{}`: {}", s, e))
}
