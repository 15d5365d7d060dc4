//! The workflow executor - runs a validated task graph for one run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dqmon_core::{RunContext, RunId, TaskStatus, Time};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::workflow::{RetryPolicy, TaskAction, Upstream, Workflow};

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max tasks running at once within a run
    pub max_concurrent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

/// Final state of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task id
    pub id: String,

    /// Terminal status
    pub status: TaskStatus,

    /// Attempts made; zero if never started
    pub attempts: u32,

    /// Output of the successful attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Error of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall time across attempts
    pub duration: Duration,
}

/// Outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,

    /// Workflow name
    pub workflow: String,

    /// When execution started
    pub started_at: Time,

    /// When the last task settled
    pub finished_at: Time,

    /// Every task, in dependency order
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Whether every task succeeded.
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded)
    }

    /// Tasks that failed or were skipped because of a failure.
    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| t.status != TaskStatus::Succeeded)
    }

    /// Report for one task.
    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

struct Attempted {
    index: usize,
    result: Result<Value, String>,
    attempts: u32,
    duration: Duration,
}

/// Runs workflow graphs.
///
/// A task starts once every upstream task has succeeded. Tasks whose
/// upstream failed are marked [`TaskStatus::UpstreamFailed`] and never run.
/// Independent tasks run concurrently, so one failing branch leaves its
/// siblings untouched.
#[derive(Debug, Clone, Default)]
pub struct WorkflowExecutor {
    config: EngineConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute every task of `workflow` under `ctx`.
    pub async fn execute(&self, workflow: &Workflow, ctx: RunContext) -> RunReport {
        let ctx = Arc::new(ctx);
        let started_at = chrono::Utc::now();
        let tasks = workflow.tasks();
        let index: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();
        let deps: Vec<Vec<usize>> = tasks
            .iter()
            .map(|t| t.depends_on.iter().filter_map(|d| index.get(d.as_str()).copied()).collect())
            .collect();

        let mut reports: Vec<TaskReport> = tasks
            .iter()
            .map(|t| TaskReport {
                id: t.id.clone(),
                status: TaskStatus::Pending,
                attempts: 0,
                output: None,
                error: None,
                duration: Duration::ZERO,
            })
            .collect();

        let order: Vec<usize> = workflow
            .ordered_tasks()
            .filter_map(|t| index.get(t.id.as_str()).copied())
            .collect();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut running: JoinSet<Attempted> = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, usize> = HashMap::new();

        info!("Starting run {} of {} ({} tasks)", ctx.run_id, workflow.name(), tasks.len());

        loop {
            for i in advance(&order, &deps, &mut reports) {
                let upstream: Upstream = deps[i]
                    .iter()
                    .filter_map(|&d| reports[d].output.clone().map(|o| (tasks[d].id.clone(), o)))
                    .collect();

                transition(&mut reports[i], TaskStatus::Running);
                let handle = running.spawn(attempt_task(
                    i,
                    tasks[i].id.clone(),
                    tasks[i].action.clone(),
                    ctx.clone(),
                    upstream,
                    workflow.retry(),
                    workflow.task_timeout(),
                    permits.clone(),
                ));
                spawned.insert(handle.id(), i);
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((_, done)) => {
                    let report = &mut reports[done.index];
                    report.attempts = done.attempts;
                    report.duration = done.duration;
                    match done.result {
                        Ok(output) => {
                            info!("Task {} succeeded", report.id);
                            transition(report, TaskStatus::Succeeded);
                            report.output = Some(output);
                        }
                        Err(e) => {
                            error!("Task {} failed after {} attempts: {}", report.id, done.attempts, e);
                            transition(report, TaskStatus::Failed);
                            report.error = Some(e);
                        }
                    }
                }
                // Attempts catch their own panics, so this only covers aborted tasks.
                Err(e) => match spawned.get(&e.id()) {
                    Some(&i) => {
                        error!("Task {} aborted: {}", reports[i].id, e);
                        abort(&mut reports[i], &e.to_string());
                    }
                    None => error!("Task join failed: {}", e),
                },
            }
        }

        let mut by_index: Vec<Option<TaskReport>> = reports.into_iter().map(Some).collect();
        let tasks = order.into_iter().filter_map(|i| by_index[i].take()).collect();

        let report = RunReport {
            run_id: ctx.run_id,
            workflow: workflow.name().to_string(),
            started_at,
            finished_at: chrono::Utc::now(),
            tasks,
        };

        if report.succeeded() {
            info!("Run {} of {} succeeded", report.run_id, report.workflow);
        } else {
            warn!(
                "Run {} of {} finished with {} unsuccessful tasks",
                report.run_id,
                report.workflow,
                report.failed_tasks().count()
            );
        }
        report
    }
}

/// Move a task to `next`. Only moves the state machine allows are made.
fn transition(report: &mut TaskReport, next: TaskStatus) {
    debug_assert!(
        report.status.can_transition_to(next),
        "illegal transition of {}: {:?} -> {:?}",
        report.id,
        report.status,
        next
    );
    report.status = next;
}

/// Fail a running task whose attempt never reported back.
fn abort(report: &mut TaskReport, reason: &str) {
    transition(report, TaskStatus::Failed);
    report.error = Some(format!("task aborted: {}", reason));
}

/// Settle pending tasks in `order`: skip those with a failed upstream and
/// return those whose upstream all succeeded.
fn advance(order: &[usize], deps: &[Vec<usize>], reports: &mut [TaskReport]) -> Vec<usize> {
    let mut ready = Vec::new();
    for &i in order {
        if reports[i].status != TaskStatus::Pending {
            continue;
        }
        let failed = deps[i]
            .iter()
            .any(|&d| matches!(reports[d].status, TaskStatus::Failed | TaskStatus::UpstreamFailed));
        let settled = deps[i].iter().all(|&d| reports[d].status == TaskStatus::Succeeded);

        if failed {
            debug!("Skipping {}: upstream failed", reports[i].id);
            transition(&mut reports[i], TaskStatus::UpstreamFailed);
        } else if settled {
            ready.push(i);
        }
    }
    ready
}

#[allow(clippy::too_many_arguments)]
async fn attempt_task(
    index: usize,
    id: String,
    action: Arc<dyn TaskAction>,
    ctx: Arc<RunContext>,
    upstream: Upstream,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    permits: Arc<Semaphore>,
) -> Attempted {
    let start = Instant::now();
    let mut attempts = 0;

    let result = loop {
        attempts += 1;
        let outcome = {
            let _permit = permits.acquire().await;
            debug!("Running {} (attempt {})", id, attempts);
            run_once(action.as_ref(), ctx.clone(), upstream.clone(), timeout).await
        };

        match outcome {
            Ok(value) => break Ok(value),
            Err(e) if attempts < retry.max_attempts() => {
                warn!(
                    "Task {} attempt {} failed: {}; retrying in {:?}",
                    id, attempts, e, retry.delay
                );
                tokio::time::sleep(retry.delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    Attempted {
        index,
        result,
        attempts,
        duration: start.elapsed(),
    }
}

async fn run_once(
    action: &dyn TaskAction,
    ctx: Arc<RunContext>,
    upstream: Upstream,
    timeout: Option<Duration>,
) -> Result<Value, String> {
    let fut = AssertUnwindSafe(action.run(ctx, upstream)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(caught) => caught,
            Err(_) => return Err(format!("timed out after {:?}", limit)),
        },
        None => fut.await,
    };

    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err("task panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{task_fn, TaskSpec};
    use dqmon_core::{StaticVariableStore, TriggerKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> RunContext {
        let store = StaticVariableStore::new().with("ENV", "dev");
        RunContext::resolve("test", &store, &[], TriggerKind::Manual).unwrap()
    }

    fn ok(value: Value) -> Arc<dyn TaskAction> {
        task_fn(move |_, _| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    fn fail(message: &'static str) -> Arc<dyn TaskAction> {
        task_fn(move |_, _| async move { Err(anyhow::anyhow!(message)) })
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let workflow = Workflow::builder("data_quality_monitoring")
            .retry(RetryPolicy::none())
            .task(TaskSpec::new("quality_check_freshness", fail("query failed")))
            .task(TaskSpec::new("log_freshness_metric", ok(json!(null))).after("quality_check_freshness"))
            .task(TaskSpec::new("quality_check_completeness", ok(json!({"sli": 1.0}))))
            .task(TaskSpec::new("log_completeness_metric", ok(json!(null))).after("quality_check_completeness"))
            .build()
            .unwrap();

        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;
        assert!(!report.succeeded());
        assert_eq!(report.task("quality_check_freshness").unwrap().status, TaskStatus::Failed);
        let skipped = report.task("log_freshness_metric").unwrap();
        assert_eq!(skipped.status, TaskStatus::UpstreamFailed);
        assert_eq!(skipped.attempts, 0);
        assert_eq!(report.task("quality_check_completeness").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(report.task("log_completeness_metric").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(report.failed_tasks().count(), 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates_transitively() {
        let workflow = Workflow::builder("dbt")
            .retry(RetryPolicy::none())
            .task(TaskSpec::new("dbt_deps", fail("no network")))
            .task(TaskSpec::new("dbt_run", ok(json!(null))).after("dbt_deps"))
            .task(TaskSpec::new("dbt_test", ok(json!(null))).after("dbt_run"))
            .build()
            .unwrap();

        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;
        let states: Vec<_> = report.tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            states,
            vec![TaskStatus::Failed, TaskStatus::UpstreamFailed, TaskStatus::UpstreamFailed]
        );
    }

    #[tokio::test]
    async fn test_upstream_output_is_passed_down() {
        let workflow = Workflow::builder("w")
            .task(TaskSpec::new("check", ok(json!({"sli": 0.5}))))
            .task(
                TaskSpec::new(
                    "log",
                    task_fn(|_, up| async move { Ok(up["check"]["sli"].clone()) }),
                )
                .after("check"),
            )
            .build()
            .unwrap();

        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;
        assert!(report.succeeded());
        assert_eq!(report.task("log").unwrap().output, Some(json!(0.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let flaky = task_fn(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("transient");
                }
                Ok(json!(n))
            }
        });

        let workflow = Workflow::builder("w").task(TaskSpec::new("flaky", flaky)).build().unwrap();
        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;

        let task = report.task("flaky").unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let broken = task_fn(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("still broken")) }
        });

        let workflow = Workflow::builder("w").task(TaskSpec::new("broken", broken)).build().unwrap();
        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;

        let task = report.task("broken").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.error.as_deref(), Some("still broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_attempt() {
        let slow = task_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let workflow = Workflow::builder("w")
            .retry(RetryPolicy::none())
            .task_timeout(Duration::from_secs(1))
            .task(TaskSpec::new("slow", slow))
            .build()
            .unwrap();

        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;
        let task = report.task("slow").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panic_is_task_failure() {
        let workflow = Workflow::builder("w")
            .retry(RetryPolicy::none())
            .task(TaskSpec::new("boom", task_fn(|_, _| async { panic!("boom") })))
            .task(TaskSpec::new("fine", ok(json!(1))))
            .build()
            .unwrap();

        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;
        assert_eq!(report.task("boom").unwrap().status, TaskStatus::Failed);
        assert_eq!(report.task("fine").unwrap().status, TaskStatus::Succeeded);
    }

    fn pending(ids: &[&str]) -> Vec<TaskReport> {
        ids.iter()
            .map(|id| TaskReport {
                id: id.to_string(),
                status: TaskStatus::Pending,
                attempts: 0,
                output: None,
                error: None,
                duration: Duration::ZERO,
            })
            .collect()
    }

    #[test]
    fn test_aborted_task_skips_its_dependents() {
        // extract -> load -> verify, plus independent audit
        let order = [0, 1, 2, 3];
        let deps = vec![vec![], vec![0], vec![1], vec![]];
        let mut reports = pending(&["extract", "load", "verify", "audit"]);

        assert_eq!(advance(&order, &deps, &mut reports), vec![0, 3]);
        transition(&mut reports[0], TaskStatus::Running);
        transition(&mut reports[3], TaskStatus::Running);

        abort(&mut reports[0], "task 7 was cancelled");
        assert_eq!(reports[0].status, TaskStatus::Failed);
        assert_eq!(reports[0].error.as_deref(), Some("task aborted: task 7 was cancelled"));

        assert!(advance(&order, &deps, &mut reports).is_empty());
        assert_eq!(reports[1].status, TaskStatus::UpstreamFailed);
        assert_eq!(reports[2].status, TaskStatus::UpstreamFailed);
        assert_eq!(reports[3].status, TaskStatus::Running);
    }

    #[test]
    fn test_advance_waits_for_all_upstream() {
        let order = [0, 1, 2];
        let deps = vec![vec![], vec![], vec![0, 1]];
        let mut reports = pending(&["a", "b", "join"]);
        reports[0].status = TaskStatus::Succeeded;
        reports[1].status = TaskStatus::Running;

        assert!(advance(&order, &deps, &mut reports).is_empty());
        reports[1].status = TaskStatus::Succeeded;
        assert_eq!(advance(&order, &deps, &mut reports), vec![2]);
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    #[cfg(debug_assertions)]
    fn test_illegal_transition_is_caught() {
        let mut reports = pending(&["a"]);
        transition(&mut reports[0], TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_empty_workflow_succeeds() {
        let workflow = Workflow::builder("w").build().unwrap();
        let report = WorkflowExecutor::new().execute(&workflow, ctx()).await;
        assert!(report.succeeded());
        assert!(report.tasks.is_empty());
    }
}
