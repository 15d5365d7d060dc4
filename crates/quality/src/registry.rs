//! Quality check registry.

use dqmon_core::CheckDefinition;
use std::collections::HashMap;

/// Registry of check definitions, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct QualityCheckRegistry {
    checks: Vec<CheckDefinition>,
    by_name: HashMap<String, usize>,
}

impl QualityCheckRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the given checks.
    pub fn with_checks(checks: impl IntoIterator<Item = CheckDefinition>) -> Result<Self, String> {
        let mut registry = Self::new();
        for check in checks {
            registry.register(check)?;
        }
        Ok(registry)
    }

    /// Register a check. Names must be unique.
    pub fn register(&mut self, check: CheckDefinition) -> Result<(), String> {
        if self.by_name.contains_key(&check.name) {
            return Err(format!("Check already registered: {}", check.name));
        }
        self.by_name.insert(check.name.clone(), self.checks.len());
        self.checks.push(check);
        Ok(())
    }

    /// Get a check by name.
    pub fn get(&self, name: &str) -> Option<&CheckDefinition> {
        self.by_name.get(name).map(|&i| &self.checks[i])
    }

    /// List all checks in registration order.
    pub fn list(&self) -> &[CheckDefinition] {
        &self.checks
    }

    /// Check names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{default_checks, freshness_check, CompletenessConfig};

    #[test]
    fn test_registration_order_and_lookup() {
        let registry = QualityCheckRegistry::with_checks(default_checks(&CompletenessConfig::default())).unwrap();
        assert_eq!(registry.names(), vec!["data_freshness_sli", "data_completeness_sli"]);
        assert_eq!(registry.get("data_completeness_sli").unwrap().metric_name, "completeness");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = QualityCheckRegistry::new();
        registry.register(freshness_check()).unwrap();
        let err = registry.register(freshness_check()).unwrap_err();
        assert!(err.contains("data_freshness_sli"));
        assert_eq!(registry.len(), 1);
    }
}
