//! dbt orchestration: `dbt deps >> dbt run >> dbt test` every six hours.

use dqmon_core::{VariableSpec, ENV_KEY};
use dqmon_execution::{task_fn, RetryPolicy, TaskSpec, Workflow, WorkflowError};
use dqmon_tools::{DbtCommand, DbtProject};
use serde_json::json;

/// Workflow name.
pub const DBT_WORKFLOW: &str = "dbt_orchestration";

/// Every six hours, on the hour.
pub const DBT_SCHEDULE: &str = "0 0 */6 * * * *";

/// Environment used as the dbt target when `ENV` is unset.
pub const DEFAULT_TARGET: &str = "dev";

fn dbt_task(project: &DbtProject, command: DbtCommand) -> TaskSpec {
    let project = project.clone();
    TaskSpec::new(
        format!("dbt_{}", command.as_str()),
        task_fn(move |ctx, _upstream| {
            let project = project.clone();
            async move {
                let output = project.run(command, &ctx.environment).await?;
                Ok(json!({
                    "command": command.as_str(),
                    "target": ctx.environment,
                    "duration_ms": output.duration.as_millis() as u64,
                }))
            }
        }),
    )
}

/// Build the dbt workflow over `project`.
pub fn dbt_workflow(project: DbtProject) -> Result<Workflow, WorkflowError> {
    Workflow::builder(DBT_WORKFLOW)
        .description("Run dbt deps, run, and test against the environment target")
        .schedule(DBT_SCHEDULE)
        .retry(RetryPolicy::none())
        .variable(VariableSpec::with_default(ENV_KEY, DEFAULT_TARGET))
        .task(dbt_task(&project, DbtCommand::Deps))
        .task(dbt_task(&project, DbtCommand::Run).after("dbt_deps"))
        .task(dbt_task(&project, DbtCommand::Test).after("dbt_run"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dqmon_core::{StaticVariableStore, TaskStatus, TriggerKind};
    use dqmon_execution::{WorkflowExecutor, WorkflowRunner};
    use dqmon_tools::{ToolExecutor, ToolInput, ToolOutput};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records dbt invocations; `run` exits non-zero when `fail_run` is set.
    struct FakeDbt {
        calls: Mutex<Vec<ToolInput>>,
        fail_run: bool,
    }

    #[async_trait]
    impl ToolExecutor for FakeDbt {
        async fn execute_tool(&self, _tool: &str, input: ToolInput) -> Result<ToolOutput, anyhow::Error> {
            let failing = self.fail_run && input.args[0] == "run";
            self.calls.lock().unwrap().push(input);
            Ok(ToolOutput {
                exit_code: if failing { 1 } else { 0 },
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(5),
            })
        }
    }

    fn fake(fail_run: bool) -> Arc<FakeDbt> {
        Arc::new(FakeDbt {
            calls: Mutex::new(Vec::new()),
            fail_run,
        })
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_with_default_target() {
        let executor = fake(false);
        let workflow = dbt_workflow(DbtProject::new(executor.clone(), "/srv/dbt")).unwrap();
        assert_eq!(workflow.schedule_expression(), Some("0 0 */6 * * * *"));

        let runner = WorkflowRunner::new(WorkflowExecutor::new(), Arc::new(StaticVariableStore::new()));
        let report = runner.trigger(&workflow, TriggerKind::Scheduled).await.unwrap();
        assert!(report.succeeded());

        let calls = executor.calls.lock().unwrap();
        let commands: Vec<_> = calls.iter().map(|c| c.args[0].as_str()).collect();
        assert_eq!(commands, vec!["deps", "run", "test"]);
        assert_eq!(calls[0].env.get("DBT_TARGET").map(String::as_str), Some("dev"));
        assert_eq!(calls[1].args, vec!["run", "--target", "dev", "--fail-fast"]);
    }

    #[tokio::test]
    async fn test_run_failure_skips_test() {
        let executor = fake(true);
        let workflow = dbt_workflow(DbtProject::new(executor.clone(), "/srv/dbt")).unwrap();
        let runner = WorkflowRunner::new(
            WorkflowExecutor::new(),
            Arc::new(StaticVariableStore::new().with("ENV", "prod")),
        );

        let report = runner.trigger(&workflow, TriggerKind::Manual).await.unwrap();
        assert_eq!(report.task("dbt_deps").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(report.task("dbt_run").unwrap().status, TaskStatus::Failed);
        assert_eq!(report.task("dbt_test").unwrap().status, TaskStatus::UpstreamFailed);
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
        assert_eq!(report.task("dbt_deps").unwrap().output.as_ref().unwrap()["target"], "prod");
    }
}
