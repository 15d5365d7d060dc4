//! The per-check metric log line scraped by external metrics collection.

use tracing::info;

use crate::engine::CheckOutcome;

/// Tracing target of metric events.
pub const METRIC_TARGET: &str = "data_quality_metric";

/// Format the metric record for a metric name and value.
pub fn metric_line(table: &str, value: f64) -> String {
    format!("{} table={} value={}", METRIC_TARGET, table, value)
}

/// Emit the metric record for a finished check and return the line.
pub fn emit_metric(outcome: &CheckOutcome) -> String {
    let line = metric_line(&outcome.metric_name, outcome.sli);
    info!(
        target: "data_quality_metric",
        table = %outcome.metric_name,
        value = outcome.sli,
        "{}",
        line
    );
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqmon_core::Destination;

    #[test]
    fn test_metric_line_format() {
        assert_eq!(metric_line("freshness", 1.0), "data_quality_metric table=freshness value=1");
        assert_eq!(metric_line("completeness", 0.5), "data_quality_metric table=completeness value=0.5");
    }

    #[test]
    fn test_emit_uses_outcome_sli() {
        let outcome = CheckOutcome {
            check_name: "data_completeness_sli".to_string(),
            metric_name: "completeness".to_string(),
            destination: Destination::new("monitoring_dev", "data_completeness_sli"),
            results: Vec::new(),
            sli: 0.25,
            passed: false,
        };
        assert_eq!(emit_metric(&outcome), "data_quality_metric table=completeness value=0.25");
    }
}
