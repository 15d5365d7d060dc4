//! Layered configuration: defaults -> `dqmon.toml` -> `DQMON_` environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dqmon_workflows::WorkflowSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "dqmon.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "DQMON_";

/// Where check results are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// JSON-lines files under `storage.path`
    Jsonl,
    /// SQLite database at `storage.path` (feature `sqlite`)
    Sqlite,
    /// Warehouse tables through `bq insert`
    Bigquery,
    /// Process memory; results are lost on exit
    Memory,
}

/// Results store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    pub backend: StorageBackend,
    /// Directory (jsonl) or database file (sqlite)
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl,
            path: PathBuf::from(".dqmon/results"),
        }
    }
}

/// Warehouse client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Project jobs run in; falls back to the `GCP_PROJECT_ID` variable
    pub project_id: Option<String>,
    /// Job location
    pub location: Option<String>,
    /// Per-statement timeout in seconds
    pub timeout_secs: u64,
    /// Maximum rows a query returns
    pub max_rows: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: None,
            timeout_secs: 600,
            max_rows: 10_000,
        }
    }
}

/// External program paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Warehouse CLI
    pub bq: String,
    /// dbt CLI
    pub dbt: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bq: "bq".to_string(),
            dbt: "dbt".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run variables (`ENV`, `GCP_PROJECT_ID`, ...); `DQMON_VAR_*` wins
    pub variables: BTreeMap<String, String>,
    /// Results store
    pub storage: StorageConfig,
    /// Warehouse client
    pub warehouse: WarehouseConfig,
    /// External programs
    pub tools: ToolsConfig,
    /// Workflow settings
    pub workflows: WorkflowSettings,
    /// Max tasks running at once within a run
    pub max_concurrent: usize,
    /// Run locks shared by `serve` and `run` processes
    pub lock_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            variables: BTreeMap::new(),
            storage: StorageConfig::default(),
            warehouse: WarehouseConfig::default(),
            tools: ToolsConfig::default(),
            workflows: WorkflowSettings::default(),
            max_concurrent: 8,
            lock_dir: PathBuf::from(".dqmon/locks"),
        }
    }
}

/// Load configuration from `path`, or from `dqmon.toml` when it exists.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    match path {
        Some(path) => figment = figment.merge(Toml::file(path)),
        None => {
            let default = Path::new(CONFIG_FILE);
            if default.exists() {
                figment = figment.merge(Toml::file(default));
            }
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
    figment.extract().map_err(Box::new)
}
