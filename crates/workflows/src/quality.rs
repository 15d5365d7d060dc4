//! Hourly data-quality monitoring.
//!
//! Every registered check becomes two tasks: the check itself, named after
//! the check, and `log_<metric>_metric`, which runs only after the check
//! succeeded and emits the metric line from the check's outcome.

use std::sync::Arc;

use anyhow::Context;
use dqmon_core::{CheckDefinition, CheckState, TaskStatus, VariableSpec, ENV_KEY, PROJECT_KEY};
use dqmon_execution::{task_fn, RunReport, TaskSpec, Workflow, WorkflowError};
use dqmon_quality::{emit_metric, CheckOutcome, QualityCheckRegistry, QualityEngine};
use serde_json::json;

/// Workflow name.
pub const QUALITY_WORKFLOW: &str = "data_quality_monitoring";

/// Top of every hour.
pub const QUALITY_SCHEDULE: &str = "0 0 * * * * *";

/// Id of the metric task for a check.
pub fn log_task_id(check: &CheckDefinition) -> String {
    format!("log_{}_metric", check.metric_name)
}

/// Build the monitoring workflow over `registry`.
pub fn quality_workflow(
    registry: &QualityCheckRegistry,
    engine: Arc<dyn QualityEngine>,
) -> Result<Workflow, WorkflowError> {
    let mut builder = Workflow::builder(QUALITY_WORKFLOW)
        .description("Data quality monitoring with SLI tracking")
        .schedule(QUALITY_SCHEDULE)
        .variable(VariableSpec::required(PROJECT_KEY))
        .variable(VariableSpec::required(ENV_KEY));

    for check in registry.list() {
        builder = builder.task(check_task(check.clone(), engine.clone()));
        builder = builder.task(log_task(check));
    }
    builder.build()
}

fn check_task(check: CheckDefinition, engine: Arc<dyn QualityEngine>) -> TaskSpec {
    let id = check.name.clone();
    let check = Arc::new(check);
    TaskSpec::new(
        id,
        task_fn(move |ctx, _upstream| {
            let check = check.clone();
            let engine = engine.clone();
            async move {
                let outcome = engine.run_check(&check, &ctx).await?;
                Ok(serde_json::to_value(outcome)?)
            }
        }),
    )
}

fn log_task(check: &CheckDefinition) -> TaskSpec {
    let upstream_id = check.name.clone();
    let key = upstream_id.clone();
    TaskSpec::new(
        log_task_id(check),
        task_fn(move |_ctx, upstream| {
            let key = key.clone();
            async move {
                let value = upstream
                    .get(&key)
                    .cloned()
                    .with_context(|| format!("no outcome from {}", key))?;
                let outcome: CheckOutcome = serde_json::from_value(value)?;
                let line = emit_metric(&outcome);
                Ok(json!({ "table": outcome.metric_name, "value": outcome.sli, "line": line }))
            }
        }),
    )
    .after(upstream_id)
}

/// Per-check lifecycle state derived from a run report.
pub fn check_states(registry: &QualityCheckRegistry, report: &RunReport) -> Vec<(String, CheckState)> {
    let status = |id: &str| report.task(id).map_or(TaskStatus::Pending, |t| t.status);
    registry
        .list()
        .iter()
        .map(|check| {
            let state = CheckState::from_tasks(status(&check.name), status(&log_task_id(check)));
            (check.name.clone(), state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dqmon_core::{Row, StaticVariableStore, TriggerKind, VariableStore};
    use dqmon_execution::{RetryPolicy, WorkflowExecutor, WorkflowRunner};
    use dqmon_quality::checks::{default_checks, CompletenessConfig};
    use dqmon_quality::BasicQualityEngine;
    use dqmon_storage::{MemoryStorage, ResultFilter, ResultStore};
    use dqmon_tools::{Warehouse, WarehouseError};
    use serde_json::Value;

    /// Answers freshness queries and rejects completeness queries.
    struct HalfBroken;

    #[async_trait]
    impl Warehouse for HalfBroken {
        async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
            if sql.contains("expected_counts") {
                return Err(WarehouseError::Query {
                    message: "Not found: Dataset".to_string(),
                });
            }
            let row = json!({"table_name": "labs_external", "hours_since_update": 1});
            Ok(vec![row.as_object().cloned().unwrap()])
        }

        async fn execute(&self, _sql: &str) -> Result<(), WarehouseError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "half-broken"
        }
    }

    fn registry() -> QualityCheckRegistry {
        QualityCheckRegistry::with_checks(default_checks(&CompletenessConfig::default())).unwrap()
    }

    fn variables() -> Arc<dyn VariableStore> {
        Arc::new(
            StaticVariableStore::new()
                .with("ENV", "dev")
                .with("GCP_PROJECT_ID", "acme-data"),
        )
    }

    #[test]
    fn test_workflow_shape() {
        let engine = Arc::new(BasicQualityEngine::new(Arc::new(HalfBroken), Arc::new(MemoryStorage::new())));
        let workflow = quality_workflow(&registry(), engine).unwrap();

        assert_eq!(workflow.name(), "data_quality_monitoring");
        assert_eq!(workflow.schedule_expression(), Some("0 0 * * * * *"));
        assert_eq!(workflow.retry(), RetryPolicy::default());

        let ids: Vec<_> = workflow.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "data_freshness_sli",
                "log_freshness_metric",
                "data_completeness_sli",
                "log_completeness_metric"
            ]
        );
        assert_eq!(workflow.task("log_freshness_metric").unwrap().depends_on, vec!["data_freshness_sli"]);
        let keys: Vec<_> = workflow.variables().iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["GCP_PROJECT_ID", "ENV"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_skips_only_its_metric() {
        let store = Arc::new(MemoryStorage::new());
        let engine = Arc::new(BasicQualityEngine::new(Arc::new(HalfBroken), store.clone()));
        let registry = registry();
        let workflow = quality_workflow(&registry, engine).unwrap();
        let runner = WorkflowRunner::new(WorkflowExecutor::new(), variables());

        let report = runner.trigger(&workflow, TriggerKind::Manual).await.unwrap();

        let freshness_log = report.task("log_freshness_metric").unwrap();
        assert_eq!(freshness_log.status, TaskStatus::Succeeded);
        let output = freshness_log.output.as_ref().unwrap();
        assert_eq!(output["line"], Value::from("data_quality_metric table=freshness value=1"));

        let completeness = report.task("data_completeness_sli").unwrap();
        assert_eq!(completeness.status, TaskStatus::Failed);
        assert_eq!(completeness.attempts, 3);
        assert_eq!(report.task("log_completeness_metric").unwrap().status, TaskStatus::UpstreamFailed);

        let states = check_states(&registry, &report);
        assert_eq!(
            states,
            vec![
                ("data_freshness_sli".to_string(), CheckState::MetricLogged),
                ("data_completeness_sli".to_string(), CheckState::Failed),
            ]
        );

        let written = store
            .list(
                &dqmon_core::Destination::new("monitoring_dev", "data_freshness_sli"),
                &ResultFilter::default(),
            )
            .await
            .unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].run_id, report.run_id);
    }
}
