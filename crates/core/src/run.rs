//! Run context - parameters resolved once per workflow invocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::id::RunId;
use crate::variables::VariableStore;
use crate::Time;

/// Variable key holding the environment name.
pub const ENV_KEY: &str = "ENV";

/// Variable key holding the warehouse project id.
pub const PROJECT_KEY: &str = "GCP_PROJECT_ID";

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Cron tick
    Scheduled,
    /// Run-now request
    Manual,
}

/// A variable a workflow needs before any of its tasks may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable key
    pub key: String,

    /// Value used when no store has the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl VariableSpec {
    /// A variable that must be set.
    pub fn required(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default: None,
        }
    }

    /// A variable with a fallback value.
    pub fn with_default(key: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default: Some(default.into()),
        }
    }
}

/// Context of one workflow run.
///
/// Built once when the run is triggered and handed to every task; nothing
/// reads global configuration after this point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Run identifier
    pub run_id: RunId,

    /// Workflow name
    pub workflow: String,

    /// Environment tag (`dev`, `prod`, ...)
    pub environment: String,

    /// Warehouse project id, when the workflow needs one
    pub project_id: Option<String>,

    /// All resolved variables
    pub variables: BTreeMap<String, String>,

    /// When the run was triggered
    pub triggered_at: Time,

    /// What triggered it
    pub trigger: TriggerKind,
}

impl RunContext {
    /// Resolve the given variables from `store`.
    ///
    /// `ENV` is always resolved. Fails on the first variable with neither a
    /// stored value nor a default.
    pub fn resolve(
        workflow: impl Into<String>,
        store: &dyn VariableStore,
        specs: &[VariableSpec],
        trigger: TriggerKind,
    ) -> Result<Self, ConfigError> {
        let mut variables = BTreeMap::new();

        for spec in specs {
            let value = store
                .get(&spec.key)
                .or_else(|| spec.default.clone())
                .ok_or_else(|| ConfigError::Missing { key: spec.key.clone() })?;
            variables.insert(spec.key.clone(), value);
        }

        if !variables.contains_key(ENV_KEY) {
            let env = store
                .get(ENV_KEY)
                .ok_or_else(|| ConfigError::Missing { key: ENV_KEY.to_string() })?;
            variables.insert(ENV_KEY.to_string(), env);
        }

        Ok(Self {
            run_id: RunId::new(),
            workflow: workflow.into(),
            environment: variables[ENV_KEY].clone(),
            project_id: variables.get(PROJECT_KEY).cloned(),
            variables,
            triggered_at: chrono::Utc::now(),
            trigger,
        })
    }

    /// Look up a resolved variable.
    pub fn var(&self, key: &str) -> Result<&str, ConfigError> {
        self.variables
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::Missing { key: key.to_string() })
    }

    /// The project id, or a missing-variable error.
    pub fn require_project(&self) -> Result<&str, ConfigError> {
        self.project_id
            .as_deref()
            .ok_or_else(|| ConfigError::Missing { key: PROJECT_KEY.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::StaticVariableStore;

    #[test]
    fn test_resolve_required_variables() {
        let store = StaticVariableStore::new()
            .with("ENV", "dev")
            .with("GCP_PROJECT_ID", "acme-data");
        let ctx = RunContext::resolve(
            "data_quality_monitoring",
            &store,
            &[VariableSpec::required("GCP_PROJECT_ID"), VariableSpec::required("ENV")],
            TriggerKind::Scheduled,
        )
        .unwrap();

        assert_eq!(ctx.environment, "dev");
        assert_eq!(ctx.project_id.as_deref(), Some("acme-data"));
        assert_eq!(ctx.var("GCP_PROJECT_ID").unwrap(), "acme-data");
        assert_eq!(ctx.trigger, TriggerKind::Scheduled);
    }

    #[test]
    fn test_resolve_missing_variable_fails() {
        let store = StaticVariableStore::new().with("ENV", "dev");
        let err = RunContext::resolve(
            "data_quality_monitoring",
            &store,
            &[VariableSpec::required("GCP_PROJECT_ID")],
            TriggerKind::Manual,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: "GCP_PROJECT_ID".to_string() });
    }

    #[test]
    fn test_resolve_uses_default() {
        let store = StaticVariableStore::new();
        let ctx = RunContext::resolve(
            "dbt_orchestration",
            &store,
            &[VariableSpec::with_default("ENV", "dev")],
            TriggerKind::Manual,
        )
        .unwrap();
        assert_eq!(ctx.environment, "dev");
        assert!(ctx.project_id.is_none());
        assert!(ctx.require_project().is_err());
    }

    #[test]
    fn test_env_always_required() {
        let store = StaticVariableStore::new().with("GCP_PROJECT_ID", "acme");
        let err = RunContext::resolve("wf", &store, &[], TriggerKind::Manual).unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: "ENV".to_string() });
    }
}
