//! dbt project invocations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::r#trait::{ToolExecutor, ToolInput, ToolOutput};

/// dbt subcommands the transformation workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbtCommand {
    /// Install package dependencies
    Deps,
    /// Build models
    Run,
    /// Run data tests
    Test,
}

impl DbtCommand {
    /// Subcommand name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deps => "deps",
            Self::Run => "run",
            Self::Test => "test",
        }
    }
}

/// A dbt project directory driven through the `dbt` tool.
#[derive(Clone)]
pub struct DbtProject {
    executor: Arc<dyn ToolExecutor>,
    dir: PathBuf,
    timeout: Option<Duration>,
}

impl DbtProject {
    /// Tool name the executor must provide.
    pub const TOOL: &'static str = "dbt";

    /// Create a project handle.
    pub fn new(executor: Arc<dyn ToolExecutor>, dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            dir: dir.into(),
            timeout: None,
        }
    }

    /// Bound each invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Project directory.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Tool input for `command` against `target`.
    pub fn input(&self, command: DbtCommand, target: &str) -> ToolInput {
        let args: Vec<&str> = match command {
            DbtCommand::Deps => vec!["deps", "--no-write-json"],
            DbtCommand::Run => vec!["run", "--target", target, "--fail-fast"],
            DbtCommand::Test => vec!["test", "--target", target],
        };

        let mut input = ToolInput::args(args).with_work_dir(self.dir.clone());
        if command == DbtCommand::Deps {
            input = input.with_env("DBT_TARGET", target);
        }
        if let Some(timeout) = self.timeout {
            input = input.with_timeout(timeout);
        }
        input
    }

    /// Run `command`; a non-zero exit is an error carrying dbt's output.
    pub async fn run(&self, command: DbtCommand, target: &str) -> Result<ToolOutput, anyhow::Error> {
        info!("dbt {} --target {} in {}", command.as_str(), target, self.dir.display());
        let output = self
            .executor
            .execute_tool(Self::TOOL, self.input(command, target))
            .await?;

        if !output.success() {
            let tail: Vec<&str> = output.stdout.lines().rev().take(20).collect();
            anyhow::bail!(
                "dbt {} exited with code {}: {}\n{}",
                command.as_str(),
                output.exit_code,
                output.stderr.trim(),
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            );
        }
        Ok(output)
    }
}
