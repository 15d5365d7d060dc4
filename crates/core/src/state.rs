//! Task and check state machines.

use serde::{Deserialize, Serialize};

/// State of a single task inside a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for upstream tasks
    Pending,
    /// Action executing (any attempt)
    Running,
    /// Action returned successfully
    Succeeded,
    /// Action failed after all attempts
    Failed,
    /// Not run because an upstream task did not succeed
    UpstreamFailed,
}

impl TaskStatus {
    /// Check if a state transition is valid.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, UpstreamFailed)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    /// Upper-case label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::UpstreamFailed => "UPSTREAM_FAILED",
        }
    }
}

/// Lifecycle of one check in one run.
///
/// ```text
/// Pending → Running → Succeeded → MetricLogged
///                   ↘ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    /// Not started
    Pending,
    /// Query executing
    Running,
    /// Rows written, metric not yet logged
    Succeeded,
    /// Metric line emitted
    MetricLogged,
    /// Query or write failed
    Failed,
}

impl CheckState {
    /// Derive the check state from its query task and its metric-log task.
    pub fn from_tasks(check: TaskStatus, log: TaskStatus) -> Self {
        match (check, log) {
            (TaskStatus::Pending, _) => Self::Pending,
            (TaskStatus::Running, _) => Self::Running,
            (TaskStatus::Failed | TaskStatus::UpstreamFailed, _) => Self::Failed,
            (TaskStatus::Succeeded, TaskStatus::Succeeded) => Self::MetricLogged,
            (TaskStatus::Succeeded, _) => Self::Succeeded,
        }
    }
}
