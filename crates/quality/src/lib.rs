//! Data quality checks
//!
//! Built-in SLI checks, row evaluation, the check engine, and the metric
//! line emitted for every successful check.

#![warn(missing_docs)]

pub mod checks;
pub mod evaluate;
pub mod engine;
pub mod registry;
pub mod metric;

pub use checks::{
    completeness_check, default_checks, freshness_check, CompletenessConfig, DomainThreshold,
    MissingThresholdPolicy,
};
pub use engine::{
    render_check, render_destination, BasicQualityEngine, CheckError, CheckOutcome, QualityEngine, RenderedCheck,
};
pub use evaluate::{evaluate_row, sli};
pub use metric::{emit_metric, metric_line, METRIC_TARGET};
pub use registry::QualityCheckRegistry;
