//! External command tool (`bq`, `dbt`, ...).

use super::r#trait::*;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs an external program with the input's arguments.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    program: String,
    description: String,
}

impl CommandTool {
    /// Create a tool named `name` that runs `program`.
    pub fn new(name: impl Into<String>, program: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            description: description.into(),
        }
    }

    /// Warehouse CLI.
    pub fn bq() -> Self {
        Self::new("bq", "bq", "BigQuery command-line client")
    }

    /// Transformation CLI.
    pub fn dbt() -> Self {
        Self::new("dbt", "dbt", "dbt command-line interface")
    }

    /// Override the program path, keeping the tool name.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput, anyhow::Error> {
        let start = std::time::Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&input.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        if let Some(dir) = &input.work_dir {
            cmd.current_dir(dir);
        }

        for (k, v) in &input.env {
            cmd.env(k, v);
        }

        debug!("Running {} {:?}", self.program, input.args);
        let mut child = cmd.spawn()?;

        if let Some(stdin) = &input.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(stdin.as_bytes()).await?;
                // Dropping the pipe closes it so the child sees EOF.
                drop(pipe);
            }
        }

        let output = match input.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", self.name, timeout))??,
            None => child.wait_with_output().await?,
        };

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_program_with_args() {
        let tool = CommandTool::new("echo", "echo", "echo");
        let output = tool.execute(&ToolInput::args(["hello"])).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_pipes_stdin() {
        let tool = CommandTool::new("cat", "cat", "cat");
        let output = tool
            .execute(&ToolInput::default().with_stdin("{\"a\":1}\n"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "{\"a\":1}\n");
    }

    #[tokio::test]
    async fn test_passes_env_and_work_dir() {
        let dir = std::env::temp_dir();
        let tool = CommandTool::new("sh", "sh", "shell");
        let output = tool
            .execute(
                &ToolInput::args(["-c", "echo $DBT_TARGET; pwd"])
                    .with_env("DBT_TARGET", "prod")
                    .with_work_dir(dir.clone()),
            )
            .await
            .unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("prod"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(pwd.canonicalize().unwrap(), dir.canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let tool = CommandTool::new("sh", "sh", "shell");
        let output = tool
            .execute(&ToolInput::args(["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_timeout() {
        let tool = CommandTool::new("sleep", "sleep", "sleep");
        let err = tool
            .execute(&ToolInput::args(["5"]).with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_program_errors() {
        let tool = CommandTool::bq().with_program("dqmon-definitely-not-installed");
        assert!(tool.execute(&ToolInput::default()).await.is_err());
    }
}
