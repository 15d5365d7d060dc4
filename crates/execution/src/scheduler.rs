//! Cron trigger - fires scheduled workflows through the runner.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use dqmon_core::{Time, TriggerKind};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::runner::{RunError, WorkflowRunner};
use crate::workflow::{Workflow, WorkflowError};

/// Parse a cron expression (seconds field first).
pub fn parse_schedule(expr: &str) -> Result<Schedule, WorkflowError> {
    Schedule::from_str(expr).map_err(|e| WorkflowError::InvalidSchedule {
        expression: expr.to_string(),
        message: e.to_string(),
    })
}

/// A scheduled workflow and its next fire time.
#[derive(Debug, Clone)]
pub struct ScheduledWorkflow {
    /// The workflow
    pub workflow: Arc<Workflow>,

    /// Next time it is due
    pub next_run: Option<Time>,
}

impl ScheduledWorkflow {
    /// Track `workflow`, computing its first fire time after `now`.
    pub fn new(workflow: Arc<Workflow>, now: Time) -> Self {
        let mut entry = Self {
            workflow,
            next_run: None,
        };
        entry.calculate_next_run(now);
        entry
    }

    /// Recalculate the next fire time strictly after `from`.
    pub fn calculate_next_run(&mut self, from: Time) {
        self.next_run = self.workflow.schedule().and_then(|s| s.after(&from).next());
    }

    /// Check if this workflow is due at `now`.
    pub fn is_due(&self, now: Time) -> bool {
        self.next_run.map_or(false, |next| next <= now)
    }
}

/// Fires workflows on their cron schedules.
///
/// Missed ticks are not caught up: after firing, the next time is computed
/// from the current time. A due workflow whose previous run is still active
/// is suppressed by the runner's guard.
///
/// Time is read from the tokio clock, anchored to the wall clock at creation.
pub struct CronScheduler {
    runner: Arc<WorkflowRunner>,
    jobs: Vec<ScheduledWorkflow>,
    anchor: (Time, Instant),
}

impl CronScheduler {
    /// Create a scheduler; workflows without a schedule are ignored.
    pub fn new(runner: Arc<WorkflowRunner>, workflows: impl IntoIterator<Item = Arc<Workflow>>) -> Self {
        let now = Utc::now();
        let jobs = workflows
            .into_iter()
            .filter(|w| w.schedule().is_some())
            .map(|w| ScheduledWorkflow::new(w, now))
            .collect();
        Self {
            runner,
            jobs,
            anchor: (now, Instant::now()),
        }
    }

    fn now(&self) -> Time {
        let (wall, started) = self.anchor;
        chrono::Duration::from_std(started.elapsed()).map_or(wall, |elapsed| wall + elapsed)
    }

    /// Tracked workflows.
    pub fn jobs(&self) -> &[ScheduledWorkflow] {
        &self.jobs
    }

    /// The earliest fire time across all workflows.
    pub fn next_wake(&self) -> Option<Time> {
        self.jobs.iter().filter_map(|j| j.next_run).min()
    }

    /// Workflows due at `now`, advancing each one's next fire time.
    pub fn take_due(&mut self, now: Time) -> Vec<Arc<Workflow>> {
        let mut due = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| j.is_due(now)) {
            due.push(job.workflow.clone());
            job.calculate_next_run(now);
        }
        due
    }

    /// Run until `shutdown` resolves, then wait for in-flight runs.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Scheduler started with {} scheduled workflows", self.jobs.len());
        for job in &self.jobs {
            if let Some(next) = job.next_run {
                info!("{} next runs at {}", job.workflow.name(), next);
            }
        }

        let mut runs = JoinSet::new();
        loop {
            while let Some(finished) = runs.try_join_next() {
                if let Err(e) = finished {
                    warn!("Scheduled run task failed: {}", e);
                }
            }

            let Some(wake) = self.next_wake() else {
                info!("No scheduled workflows; waiting for shutdown");
                shutdown.as_mut().await;
                break;
            };
            let delay = (wake - self.now()).to_std().unwrap_or_default();
            debug!("Sleeping {:?} until {}", delay, wake);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.as_mut() => break,
            }

            let now = self.now();
            for workflow in self.take_due(now) {
                let runner = self.runner.clone();
                runs.spawn(async move { fire(&runner, &workflow).await });
            }
        }

        if !runs.is_empty() {
            info!("Scheduler stopping; waiting for {} active runs", runs.len());
        }
        while let Some(finished) = runs.join_next().await {
            if let Err(e) = finished {
                warn!("Scheduled run task failed: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

async fn fire(runner: &WorkflowRunner, workflow: &Workflow) {
    match runner.trigger(workflow, TriggerKind::Scheduled).await {
        Ok(report) if report.succeeded() => {
            info!("Scheduled run {} of {} succeeded", report.run_id, workflow.name())
        }
        Ok(report) => warn!(
            "Scheduled run {} of {} had {} unsuccessful tasks",
            report.run_id,
            workflow.name(),
            report.failed_tasks().count()
        ),
        Err(RunError::AlreadyRunning(_)) => {}
        Err(e) => warn!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WorkflowExecutor;
    use crate::workflow::{task_fn, TaskSpec};
    use chrono::{TimeZone, Timelike};
    use dqmon_core::StaticVariableStore;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn workflow(name: &str, schedule: Option<&str>) -> Arc<Workflow> {
        let mut builder = Workflow::builder(name).task(TaskSpec::new("t", task_fn(|_, _| async { Ok(Value::Null) })));
        if let Some(expr) = schedule {
            builder = builder.schedule(expr);
        }
        Arc::new(builder.build().unwrap())
    }

    fn runner() -> Arc<WorkflowRunner> {
        Arc::new(WorkflowRunner::new(
            WorkflowExecutor::new(),
            Arc::new(StaticVariableStore::new().with("ENV", "dev")),
        ))
    }

    #[test]
    fn test_parse_hourly_and_six_hourly() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();

        let hourly = parse_schedule("0 0 * * * * *").unwrap();
        assert_eq!(hourly.after(&from).next(), Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap()));

        let six = parse_schedule("0 0 */6 * * * *").unwrap();
        let next = six.after(&from).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(next.hour() % 6, 0);
    }

    #[test]
    fn test_parse_invalid() {
        let err = parse_schedule("not a cron").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidSchedule { .. }));
    }

    #[test]
    fn test_manual_workflows_are_not_tracked() {
        let scheduler = CronScheduler::new(
            runner(),
            vec![workflow("hourly", Some("0 0 * * * * *")), workflow("manual", None)],
        );
        assert_eq!(scheduler.jobs().len(), 1);
        assert_eq!(scheduler.jobs()[0].workflow.name(), "hourly");
    }

    #[test]
    fn test_take_due_advances_without_catch_up() {
        let mut scheduler = CronScheduler::new(runner(), vec![workflow("hourly", Some("0 0 * * * * *"))]);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        scheduler.jobs[0].calculate_next_run(now);
        assert_eq!(scheduler.next_wake(), Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap()));

        assert!(scheduler.take_due(now).is_empty());

        // Several ticks late: fires once, next tick is after the late time.
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let due = scheduler.take_due(late);
        assert_eq!(due.len(), 1);
        assert_eq!(scheduler.next_wake(), Some(Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()));
        assert!(scheduler.take_due(late).is_empty());
    }

    /// Every second; each run sleeps `busy` and counts starts and finishes.
    fn busy_workflow(busy: Duration, started: Arc<AtomicU32>, finished: Arc<AtomicU32>) -> Arc<Workflow> {
        let task = task_fn(move |_, _| {
            let started = started.clone();
            let finished = finished.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(busy).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        Arc::new(
            Workflow::builder("every_second")
                .schedule("* * * * * * *")
                .task(TaskSpec::new("t", task))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_workflow_is_triggered() {
        let started = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));
        let wf = busy_workflow(Duration::from_millis(100), started.clone(), finished.clone());
        let scheduler = CronScheduler::new(runner(), vec![wf]);

        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(2500)))
            .await;

        // Two or three whole-second ticks fall inside 2.5s.
        let runs = started.load(Ordering::SeqCst);
        assert!((2..=3).contains(&runs), "runs = {}", runs);
        assert_eq!(finished.load(Ordering::SeqCst), runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_during_active_run_is_suppressed() {
        let started = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));
        let wf = busy_workflow(Duration::from_millis(1500), started.clone(), finished.clone());
        let scheduler = CronScheduler::new(runner(), vec![wf]);

        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(3500)))
            .await;

        // Ticks at t0, t0+1, t0+2 (and maybe t0+3): the second and fourth
        // land while a run is active.
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_active_run() {
        let started = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));
        let wf = busy_workflow(Duration::from_secs(30), started.clone(), finished.clone());
        let scheduler = CronScheduler::new(runner(), vec![wf]);

        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(1300)))
            .await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let scheduler = CronScheduler::new(runner(), vec![workflow("hourly", Some("0 0 * * * * *"))]);
        tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.run_until(async {}))
            .await
            .unwrap();
    }
}
