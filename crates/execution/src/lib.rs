//! Execution layer - workflow graphs, dependency ordering, task execution,
//! the single-active-run guard, and the cron trigger.

#![warn(missing_docs)]

pub mod workflow;
pub mod dependency;
pub mod engine;
pub mod runner;
pub mod scheduler;

pub use workflow::{
    task_fn, RetryPolicy, TaskAction, TaskSpec, Upstream, Workflow, WorkflowBuilder, WorkflowError,
};
pub use dependency::DepGraph;
pub use engine::{EngineConfig, RunReport, TaskReport, WorkflowExecutor};
pub use runner::{RunError, RunGuard, RunPermit, WorkflowRunner};
pub use scheduler::{parse_schedule, CronScheduler, ScheduledWorkflow};
