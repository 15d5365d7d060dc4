//! dqmon core data models.
//!
//! Check definitions, stored results, run contexts, and the per-task state
//! machine shared by the runner crates.

#![warn(missing_docs)]

mod id;
mod check;
mod result;
mod run;
mod state;
mod error;

pub mod domains;
pub mod template;
pub mod variables;

pub use id::*;
pub use check::{CheckDefinition, Comparison, Destination, Evaluation, WriteMode};
pub use result::{CheckResult, Row, value_as_f64};
pub use run::{RunContext, TriggerKind, VariableSpec, ENV_KEY, PROJECT_KEY};
pub use state::{CheckState, TaskStatus};
pub use error::ConfigError;
pub use domains::DOMAINS;
pub use variables::{EnvVariableStore, LayeredVariableStore, StaticVariableStore, VariableStore};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
