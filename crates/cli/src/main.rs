//! dqmon CLI - scheduled data-quality checks and warehouse workflows.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dqmon_core::{
    EnvVariableStore, LayeredVariableStore, RunContext, StaticVariableStore, TaskStatus, TriggerKind,
    VariableSpec, VariableStore, PROJECT_KEY,
};
use dqmon_execution::{CronScheduler, EngineConfig, RunGuard, RunReport, WorkflowExecutor, WorkflowRunner};
use dqmon_quality::{render_check, render_destination, QualityCheckRegistry};
use dqmon_storage::{JsonLinesStorage, MemoryStorage, ResultFilter, ResultStore};
use dqmon_tools::{BqWarehouse, CommandTool, ToolExecutor, ToolRegistry};
use dqmon_workflows::{check_states, WorkflowCatalog, QUALITY_WORKFLOW};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, Config, StorageBackend};

#[derive(Parser)]
#[command(name = "dqmon")]
#[command(about = "Scheduled data-quality checks and warehouse workflows", long_about = None)]
struct Cli {
    /// Configuration file (default: ./dqmon.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workflows, schedules, and tasks
    List,
    /// Trigger one run of a workflow now
    Run {
        /// Workflow name
        workflow: String,
    },
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Print the rendered SQL of a check
    Render {
        /// Check name
        check: String,
    },
    /// Show stored results of a check
    Results {
        /// Check name
        check: String,
        /// Newest rows to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Everything a command needs, wired from configuration.
struct App {
    config: Config,
    variables: Arc<dyn VariableStore>,
    tools: Arc<dyn ToolExecutor>,
    warehouse: BqWarehouse,
    registry: QualityCheckRegistry,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let variables: Arc<dyn VariableStore> = Arc::new(
            LayeredVariableStore::new()
                .with_layer(EnvVariableStore::default())
                .with_layer(StaticVariableStore::from(config.variables.clone())),
        );

        let tools: Arc<dyn ToolExecutor> = Arc::new(
            ToolRegistry::new()
                .register(CommandTool::bq().with_program(config.tools.bq.clone()))
                .register(CommandTool::dbt().with_program(config.tools.dbt.clone())),
        );

        let project = config
            .warehouse
            .project_id
            .clone()
            .or_else(|| variables.get(PROJECT_KEY))
            .unwrap_or_default();
        let mut warehouse = BqWarehouse::new(tools.clone(), project)
            .with_timeout(Duration::from_secs(config.warehouse.timeout_secs))
            .with_max_rows(config.warehouse.max_rows);
        if let Some(location) = &config.warehouse.location {
            warehouse = warehouse.with_location(location.clone());
        }

        let registry = WorkflowCatalog::standard_checks(&config.workflows)?;

        Ok(Self {
            config,
            variables,
            tools,
            warehouse,
            registry,
        })
    }

    async fn open_store(&self) -> Result<Arc<dyn ResultStore>> {
        let path = &self.config.storage.path;
        let store: Arc<dyn ResultStore> = match self.config.storage.backend {
            StorageBackend::Jsonl => Arc::new(
                JsonLinesStorage::new(path)
                    .await
                    .with_context(|| format!("opening results directory {}", path.display()))?,
            ),
            StorageBackend::Sqlite => open_sqlite(path).await?,
            StorageBackend::Bigquery => Arc::new(self.warehouse.clone()),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        info!("Results store: {}", store.name());
        Ok(store)
    }

    fn catalog(&self, store: Arc<dyn ResultStore>) -> Result<WorkflowCatalog> {
        Ok(WorkflowCatalog::standard(
            &self.config.workflows,
            &self.registry,
            Arc::new(self.warehouse.clone()),
            store,
            self.tools.clone(),
        )?)
    }

    fn runner(&self) -> Result<WorkflowRunner> {
        let executor = WorkflowExecutor::new().with_config(EngineConfig {
            max_concurrent: self.config.max_concurrent,
        });
        let lock_dir = &self.config.lock_dir;
        let guard = RunGuard::with_lock_dir(lock_dir)
            .with_context(|| format!("creating lock directory {}", lock_dir.display()))?;
        Ok(WorkflowRunner::new(executor, self.variables.clone()).with_guard(guard))
    }

    fn context(&self, specs: &[VariableSpec]) -> Result<RunContext> {
        Ok(RunContext::resolve("cli", self.variables.as_ref(), specs, TriggerKind::Manual)?)
    }

    fn check(&self, name: &str) -> Result<&dqmon_core::CheckDefinition> {
        self.registry
            .get(name)
            .with_context(|| format!("Unknown check: {} (known: {})", name, self.registry.names().join(", ")))
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(path: &Path) -> Result<Arc<dyn ResultStore>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(Arc::new(dqmon_storage::SqliteStorage::new(path).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_path: &Path) -> Result<Arc<dyn ResultStore>> {
    anyhow::bail!("storage backend `sqlite` needs dqmon built with the `sqlite` feature")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let app = App::new(config)?;

    match cli.command {
        Commands::List => {
            let catalog = app.catalog(Arc::new(MemoryStorage::new()))?;
            for workflow in catalog.iter() {
                println!(
                    "{} [{}]",
                    workflow.name(),
                    workflow.schedule_expression().unwrap_or("manual")
                );
                if !workflow.description().is_empty() {
                    println!("  {}", workflow.description());
                }
                for task in workflow.ordered_tasks() {
                    if task.depends_on.is_empty() {
                        println!("    {}", task.id);
                    } else {
                        println!("    {} <- {}", task.id, task.depends_on.join(", "));
                    }
                }
            }
        }
        Commands::Run { workflow } => {
            let catalog = app.catalog(app.open_store().await?)?;
            let Some(target) = catalog.get(&workflow) else {
                anyhow::bail!("Unknown workflow: {} (known: {})", workflow, catalog.names().join(", "));
            };

            let report = app.runner()?.trigger(&target, TriggerKind::Manual).await?;
            print_report(&report);
            if target.name() == QUALITY_WORKFLOW {
                for (check, state) in check_states(&app.registry, &report) {
                    println!("  {:<28} {:?}", check, state);
                }
            }

            let failed = report.failed_tasks().count();
            if failed > 0 {
                anyhow::bail!("{} of {} tasks did not succeed", failed, report.tasks.len());
            }
        }
        Commands::Serve => {
            let catalog = app.catalog(app.open_store().await?)?;
            let scheduler = CronScheduler::new(Arc::new(app.runner()?), catalog.iter().cloned());
            scheduler
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Cannot listen for Ctrl-C: {}", e);
                    }
                })
                .await;
        }
        Commands::Render { check } => {
            let check = app.check(&check)?;
            let ctx = app.context(&[VariableSpec::required(PROJECT_KEY)])?;
            let rendered = render_check(check, &ctx)?;
            println!("-- {} -> {}", check.name, rendered.destination);
            println!("{}", rendered.query);
        }
        Commands::Results { check, limit } => {
            let check = app.check(&check)?;
            let ctx = app.context(&[])?;
            let destination = render_destination(check, &ctx)?;
            let store = app.open_store().await?;
            let filter = ResultFilter {
                check_name: Some(check.name.clone()),
                limit: Some(limit),
                ..Default::default()
            };

            let rows = store.list(&destination, &filter).await?;
            println!("{} ({} rows from {})", check.name, rows.len(), destination);
            for row in rows {
                println!(
                    "  {} | {} | {:<24} | {:>10} | {:>10} | {}",
                    row.evaluated_at.format("%Y-%m-%d %H:%M:%S"),
                    row.run_id,
                    row.subject.as_deref().unwrap_or("-"),
                    row.measured_value,
                    row.threshold.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
                    if row.passed { "PASS" } else { "FAIL" },
                );
            }
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {} of {}", report.run_id, report.workflow);
    for task in &report.tasks {
        let detail = match (&task.status, &task.error) {
            (TaskStatus::Failed, Some(error)) => format!(" - {}", error),
            _ => String::new(),
        };
        println!(
            "  {:<36} {:<16} attempts={}{}",
            task.id,
            task.status.label(),
            task.attempts,
            detail
        );
    }
}
