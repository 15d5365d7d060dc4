//! Key-value variable stores that environment parameters are resolved from.

use std::collections::BTreeMap;

/// A source of workflow variables.
pub trait VariableStore: Send + Sync {
    /// Look up a variable.
    fn get(&self, key: &str) -> Option<String>;

    /// Store name, for logging.
    fn name(&self) -> &str;
}

/// Reads variables from the process environment under a prefix.
#[derive(Debug, Clone)]
pub struct EnvVariableStore {
    prefix: String,
}

impl EnvVariableStore {
    /// Default prefix (`DQMON_VAR_GCP_PROJECT_ID` resolves `GCP_PROJECT_ID`).
    pub const DEFAULT_PREFIX: &'static str = "DQMON_VAR_";

    /// Create a store with a custom prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for EnvVariableStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl VariableStore for EnvVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key))
            .ok()
            .filter(|v| !v.is_empty())
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// Fixed variables, usually loaded from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticVariableStore {
    values: BTreeMap<String, String>,
}

impl StaticVariableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl From<BTreeMap<String, String>> for StaticVariableStore {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl VariableStore for StaticVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Tries each store in order; the first hit wins.
#[derive(Default)]
pub struct LayeredVariableStore {
    layers: Vec<Box<dyn VariableStore>>,
}

impl LayeredVariableStore {
    /// Create an empty layered store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority layer.
    pub fn with_layer(mut self, store: impl VariableStore + 'static) -> Self {
        self.layers.push(Box::new(store));
        self
    }
}

impl VariableStore for LayeredVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    fn name(&self) -> &str {
        "layered"
    }
}
