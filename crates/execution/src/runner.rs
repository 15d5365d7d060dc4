//! Triggering runs: variable resolution and the single-active-run guard.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dqmon_core::{ConfigError, RunContext, TriggerKind, VariableStore};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{RunReport, WorkflowExecutor};
use crate::workflow::Workflow;

/// Reasons a trigger did not produce a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A run of this workflow is already active
    #[error("workflow `{0}` already has an active run")]
    AlreadyRunning(String),

    /// A required variable is missing; no task was started
    #[error("workflow `{workflow}` not started: {source}")]
    Config {
        /// Workflow name
        workflow: String,
        /// Resolution failure
        #[source]
        source: ConfigError,
    },

    /// The run lock could not be taken or checked
    #[error("workflow `{workflow}` not started: run lock: {source}")]
    Lock {
        /// Workflow name
        workflow: String,
        /// I/O failure on the lock file
        #[source]
        source: io::Error,
    },
}

/// Tracks which workflows have an active run.
///
/// Runs are always tracked in memory. With a lock directory, each run also
/// holds an exclusive `flock` on `<dir>/<workflow>.lock`, so runners in
/// other processes sharing the directory see it as active too.
#[derive(Debug, Default)]
pub struct RunGuard {
    active: Mutex<HashSet<String>>,
    lock_dir: Option<PathBuf>,
}

impl RunGuard {
    /// Create a guard local to this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a guard that also locks files under `dir`, creating it.
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            active: Mutex::default(),
            lock_dir: Some(dir),
        })
    }

    /// Lock directory, if runs are shared across processes.
    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Claim the workflow, or `Ok(None)` if a run is already active here or
    /// in another process.
    pub fn try_acquire(self: &Arc<Self>, workflow: &str) -> io::Result<Option<RunPermit>> {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(workflow.to_string()) {
                return Ok(None);
            }
        }

        let lock = match &self.lock_dir {
            Some(dir) => match RunLock::acquire(&dir.join(format!("{}.lock", workflow))) {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => {
                    self.release(workflow);
                    return Ok(None);
                }
                Err(e) => {
                    self.release(workflow);
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(Some(RunPermit {
            guard: self.clone(),
            workflow: workflow.to_string(),
            _lock: lock,
        }))
    }

    /// Whether a run of the workflow is active in this process.
    pub fn is_active(&self, workflow: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(workflow)
    }

    fn release(&self, workflow: &str) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(workflow);
    }
}

/// Exclusive advisory lock on a file; released when dropped.
#[derive(Debug)]
struct RunLock {
    file: File,
}

impl RunLock {
    /// `Ok(None)` when another holder has the lock.
    fn acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(None);
                }
                return Err(err);
            }
        }

        debug!("Locked {}", path.display());
        Ok(Some(Self { file }))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // The file stays; removing it would let a waiter lock an unlinked inode.
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

/// Releases the workflow when dropped.
#[derive(Debug)]
pub struct RunPermit {
    guard: Arc<RunGuard>,
    workflow: String,
    _lock: Option<RunLock>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.release(&self.workflow);
    }
}

/// Starts workflow runs. Shared by the scheduler and manual triggers so both
/// go through the same guard.
pub struct WorkflowRunner {
    executor: WorkflowExecutor,
    variables: Arc<dyn VariableStore>,
    guard: Arc<RunGuard>,
}

impl WorkflowRunner {
    /// Create a runner reading variables from `variables`.
    pub fn new(executor: WorkflowExecutor, variables: Arc<dyn VariableStore>) -> Self {
        Self {
            executor,
            variables,
            guard: Arc::new(RunGuard::new()),
        }
    }

    /// Use `guard` instead of a process-local one.
    pub fn with_guard(mut self, guard: RunGuard) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    /// The active-run guard.
    pub fn guard(&self) -> &Arc<RunGuard> {
        &self.guard
    }

    /// Resolve variables, then run every task.
    ///
    /// Fails without running anything when the workflow is already active or
    /// a required variable is missing.
    pub async fn trigger(&self, workflow: &Workflow, trigger: TriggerKind) -> Result<RunReport, RunError> {
        let permit = self.guard.try_acquire(workflow.name()).map_err(|source| {
            error!("Cannot lock {}: {}", workflow.name(), source);
            RunError::Lock {
                workflow: workflow.name().to_string(),
                source,
            }
        })?;
        let Some(_permit) = permit else {
            warn!("Suppressed {:?} trigger of {}: a run is already active", trigger, workflow.name());
            return Err(RunError::AlreadyRunning(workflow.name().to_string()));
        };

        let ctx = RunContext::resolve(workflow.name(), self.variables.as_ref(), workflow.variables(), trigger)
            .map_err(|source| {
                error!("Cannot start {}: {}", workflow.name(), source);
                RunError::Config {
                    workflow: workflow.name().to_string(),
                    source,
                }
            })?;

        info!(
            "Triggered {} ({:?}) as run {} in {}",
            workflow.name(),
            trigger,
            ctx.run_id,
            ctx.environment
        );
        Ok(self.executor.execute(workflow, ctx).await)
    }
}
