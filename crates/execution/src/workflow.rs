//! Workflow definitions: tasks with explicit upstream lists.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cron::Schedule;
use dqmon_core::{RunContext, VariableSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dependency::DepGraph;
use crate::scheduler::parse_schedule;

/// Outputs of a task's upstream tasks, keyed by task id.
pub type Upstream = BTreeMap<String, Value>;

/// Error type for workflow construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Two tasks share an id
    #[error("duplicate task id `{0}`")]
    DuplicateTask(String),

    /// A task depends on an id that is not in the workflow
    #[error("task `{task}` depends on unknown task `{dependency}`")]
    UnknownDependency {
        /// Dependent task
        task: String,
        /// Missing upstream id
        dependency: String,
    },

    /// The dependency graph is not acyclic
    #[error("dependency cycle between tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// The cron expression did not parse
    #[error("invalid schedule `{expression}`: {message}")]
    InvalidSchedule {
        /// Expression as given
        expression: String,
        /// Parser message
        message: String,
    },
}

/// The work a task performs.
///
/// Actions receive the run context and the JSON outputs of their upstream
/// tasks; their own output is handed to their dependents.
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Run one attempt.
    async fn run(&self, ctx: Arc<RunContext>, upstream: Upstream) -> anyhow::Result<Value>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn(Arc<RunContext>, Upstream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, ctx: Arc<RunContext>, upstream: Upstream) -> anyhow::Result<Value> {
        (self.0)(ctx, upstream).await
    }
}

/// Wrap an async closure as a task action.
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn TaskAction>
where
    F: Fn(Arc<RunContext>, Upstream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// One node of a workflow graph.
#[derive(Clone)]
pub struct TaskSpec {
    /// Task id, unique within the workflow
    pub id: String,

    /// Ids of tasks that must succeed first
    pub depends_on: Vec<String>,

    /// What the task does
    pub action: Arc<dyn TaskAction>,
}

impl TaskSpec {
    /// Create a task with no upstream tasks.
    pub fn new(id: impl Into<String>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            action,
        }
    }

    /// Add an upstream task.
    pub fn after(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(upstream.into());
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Bounded retry with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,

    /// Delay before each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// A validated workflow.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    description: String,
    schedule: Option<(String, Schedule)>,
    variables: Vec<VariableSpec>,
    retry: RetryPolicy,
    task_timeout: Option<Duration>,
    tasks: Vec<TaskSpec>,
    order: Vec<usize>,
}

impl Workflow {
    /// Start building a workflow.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Cron expression, if scheduled.
    pub fn schedule_expression(&self) -> Option<&str> {
        self.schedule.as_ref().map(|(expr, _)| expr.as_str())
    }

    /// Parsed schedule, if scheduled.
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref().map(|(_, s)| s)
    }

    /// Variables resolved before the first task.
    pub fn variables(&self) -> &[VariableSpec] {
        &self.variables
    }

    /// Retry policy applied to every task.
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Per-attempt timeout.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Tasks in a dependency-respecting order.
    pub fn ordered_tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.order.iter().map(|&i| &self.tasks[i])
    }

    /// Look up a task.
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Builder for [`Workflow`]; [`build`](Self::build) validates the graph.
#[derive(Debug)]
pub struct WorkflowBuilder {
    name: String,
    description: String,
    schedule: Option<String>,
    variables: Vec<VariableSpec>,
    retry: RetryPolicy,
    task_timeout: Option<Duration>,
    tasks: Vec<TaskSpec>,
}

impl WorkflowBuilder {
    /// Create a builder with the default retry policy and no schedule.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schedule: None,
            variables: Vec::new(),
            retry: RetryPolicy::default(),
            task_timeout: None,
            tasks: Vec::new(),
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the cron expression (seconds field first).
    pub fn schedule(mut self, expression: impl Into<String>) -> Self {
        self.schedule = Some(expression.into());
        self
    }

    /// Declare a variable the run needs.
    pub fn variable(mut self, spec: VariableSpec) -> Self {
        self.variables.push(spec);
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each task attempt.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Add a task.
    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Add several tasks.
    pub fn tasks(mut self, tasks: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Validate the schedule and the task graph.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let schedule = match self.schedule {
            Some(expr) => {
                let parsed = parse_schedule(&expr)?;
                Some((expr, parsed))
            }
            None => None,
        };

        let order = DepGraph::new(&self.tasks)?.topological_sort()?;

        Ok(Workflow {
            name: self.name,
            description: self.description,
            schedule,
            variables: self.variables,
            retry: self.retry,
            task_timeout: self.task_timeout,
            tasks: self.tasks,
            order,
        })
    }
}
