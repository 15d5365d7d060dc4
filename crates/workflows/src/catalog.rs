//! The set of workflows a process serves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dqmon_core::DOMAINS;
use dqmon_execution::{Workflow, WorkflowError};
use dqmon_quality::{default_checks, BasicQualityEngine, CompletenessConfig, QualityCheckRegistry};
use dqmon_storage::ResultStore;
use dqmon_tools::{DbtProject, ToolExecutor, Warehouse};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{dbt_workflow, external_tables_workflow, quality_workflow};

/// Errors assembling a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A workflow failed validation
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Two workflows or checks share a name
    #[error("duplicate name: {0}")]
    Duplicate(String),
}

/// Settings for the standard workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Completeness thresholds and policy
    pub completeness: CompletenessConfig,

    /// Domains with external tables
    pub domains: Vec<String>,

    /// dbt project directory
    pub dbt_dir: PathBuf,

    /// Per-attempt timeout for dbt tasks, in seconds
    pub dbt_timeout_secs: Option<u64>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            completeness: CompletenessConfig::default(),
            domains: DOMAINS.iter().map(|d| d.to_string()).collect(),
            dbt_dir: PathBuf::from("/home/airflow/gcs/data/dbt"),
            dbt_timeout_secs: None,
        }
    }
}

/// Workflows by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: Vec<Arc<Workflow>>,
}

impl WorkflowCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The quality, external-table, and dbt workflows.
    pub fn standard(
        settings: &WorkflowSettings,
        registry: &QualityCheckRegistry,
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn ResultStore>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Result<Self, CatalogError> {
        let engine = Arc::new(BasicQualityEngine::new(warehouse.clone(), store));

        let mut project = DbtProject::new(tools, settings.dbt_dir.clone());
        if let Some(secs) = settings.dbt_timeout_secs {
            project = project.with_timeout(Duration::from_secs(secs));
        }

        let mut catalog = Self::new();
        catalog.register(quality_workflow(registry, engine)?)?;
        catalog.register(external_tables_workflow(settings.domains.as_slice(), warehouse)?)?;
        catalog.register(dbt_workflow(project)?)?;
        Ok(catalog)
    }

    /// Check registry for the standard quality workflow.
    pub fn standard_checks(settings: &WorkflowSettings) -> Result<QualityCheckRegistry, CatalogError> {
        QualityCheckRegistry::with_checks(default_checks(&settings.completeness)).map_err(CatalogError::Duplicate)
    }

    /// Add a workflow. Names must be unique.
    pub fn register(&mut self, workflow: Workflow) -> Result<(), CatalogError> {
        if self.get(workflow.name()).is_some() {
            return Err(CatalogError::Duplicate(workflow.name().to_string()));
        }
        self.workflows.push(Arc::new(workflow));
        Ok(())
    }

    /// Look up a workflow by name.
    pub fn get(&self, name: &str) -> Option<Arc<Workflow>> {
        self.workflows.iter().find(|w| w.name() == name).cloned()
    }

    /// All workflows.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Workflow>> {
        self.workflows.iter()
    }

    /// Workflow names.
    pub fn names(&self) -> Vec<&str> {
        self.workflows.iter().map(|w| w.name()).collect()
    }
}
