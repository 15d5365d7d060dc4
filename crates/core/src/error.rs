//! Configuration errors raised before any task runs.

/// Errors resolving environment parameters for a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable has no value in any store
    #[error("required variable `{key}` is not set")]
    Missing {
        /// Variable key
        key: String,
    },

    /// A template placeholder could not be resolved
    #[error("unresolved template placeholder `{placeholder}`")]
    Unresolved {
        /// Placeholder text without braces
        placeholder: String,
    },
}
