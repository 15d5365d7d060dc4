//! Quality check engine.

use async_trait::async_trait;
use dqmon_core::{template, CheckDefinition, CheckResult, ConfigError, Destination, RunContext};
use dqmon_storage::{ResultStore, StorageError};
use dqmon_tools::{Warehouse, WarehouseError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::evaluate::{evaluate_row, sli};

/// Reasons a check fails.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A template placeholder or variable could not be resolved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The warehouse rejected or timed out the query
    #[error(transparent)]
    Query(#[from] WarehouseError),

    /// Appending results failed
    #[error("write failed: {0}")]
    Write(#[from] StorageError),

    /// The query returned no rows
    #[error("check {check} returned no rows")]
    EmptyResult {
        /// Check name
        check: String,
    },

    /// A row lacked a numeric value for a column the rule reads
    #[error("check {check}: column {column} missing or not numeric")]
    MissingColumn {
        /// Check name
        check: String,
        /// Column name
        column: String,
    },
}

/// A check with its templates resolved for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCheck {
    /// SQL to run
    pub query: String,
    /// Table the results go to
    pub destination: Destination,
}

/// Outcome of one successful check execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Check name
    pub check_name: String,

    /// Metric name for the log line
    pub metric_name: String,

    /// Rendered destination the rows were appended to
    pub destination: Destination,

    /// Evaluated rows, as written
    pub results: Vec<CheckResult>,

    /// Fraction of rows that passed
    pub sli: f64,

    /// Whether every row passed
    pub passed: bool,
}

impl CheckOutcome {
    /// Rows that failed their rule.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Resolve a check's destination table against a run context.
pub fn render_destination(check: &CheckDefinition, ctx: &RunContext) -> Result<Destination, ConfigError> {
    Ok(Destination::new(
        template::render(&check.destination.dataset, ctx)?,
        template::render(&check.destination.table, ctx)?,
    ))
}

/// Resolve a check's query and destination against a run context.
pub fn render_check(check: &CheckDefinition, ctx: &RunContext) -> Result<RenderedCheck, ConfigError> {
    Ok(RenderedCheck {
        query: template::render(&check.query, ctx)?,
        destination: render_destination(check, ctx)?,
    })
}

/// Quality check engine.
#[async_trait]
pub trait QualityEngine: Send + Sync {
    /// Render, query, evaluate, and append one check.
    async fn run_check(
        &self,
        check: &CheckDefinition,
        ctx: &RunContext,
    ) -> Result<CheckOutcome, CheckError>;
}

/// Engine that queries a [`Warehouse`] and appends to a [`ResultStore`].
pub struct BasicQualityEngine {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ResultStore>,
}

impl BasicQualityEngine {
    /// Create a new quality engine.
    pub fn new(warehouse: Arc<dyn Warehouse>, store: Arc<dyn ResultStore>) -> Self {
        Self { warehouse, store }
    }
}

#[async_trait]
impl QualityEngine for BasicQualityEngine {
    async fn run_check(
        &self,
        check: &CheckDefinition,
        ctx: &RunContext,
    ) -> Result<CheckOutcome, CheckError> {
        let rendered = render_check(check, ctx)?;
        debug!("Running quality check {} on {}", check.name, self.warehouse.name());

        let rows = self.warehouse.query(&rendered.query).await?;
        if rows.is_empty() {
            return Err(CheckError::EmptyResult {
                check: check.name.clone(),
            });
        }

        let evaluated_at = chrono::Utc::now();
        let results = rows
            .into_iter()
            .map(|row| evaluate_row(check, row, ctx.run_id, evaluated_at))
            .collect::<Result<Vec<_>, _>>()?;

        let written = self.store.append(&rendered.destination, &results).await?;
        info!(
            "Check {} appended {} rows to {} via {}",
            check.name,
            written,
            rendered.destination,
            self.store.name()
        );

        let sli = sli(&results);
        let passed = results.iter().all(|r| r.passed);
        let outcome = CheckOutcome {
            check_name: check.name.clone(),
            metric_name: check.metric_name.clone(),
            destination: rendered.destination,
            results,
            sli,
            passed,
        };

        for failure in outcome.failures() {
            warn!(
                "Check {} failed for {}: {} vs threshold {:?}",
                check.name,
                failure.subject.as_deref().unwrap_or("-"),
                failure.measured_value,
                failure.threshold
            );
        }
        Ok(outcome)
    }
}
