//! Stored check results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{CheckResultId, RunId};
use crate::Time;

/// A tabular result row as returned by the warehouse.
pub type Row = serde_json::Map<String, Value>;

/// One evaluated result row of a check.
///
/// Rows are append-only: the runner writes each one exactly once and never
/// updates or deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Unique identifier
    pub id: CheckResultId,

    /// Run that produced this row
    pub run_id: RunId,

    /// Check that produced this row
    pub check_name: String,

    /// Table or domain the row measures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Measured value
    pub measured_value: f64,

    /// Threshold the value was compared against, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Whether the row passed
    pub passed: bool,

    /// When the row was evaluated
    pub evaluated_at: Time,

    /// Raw columns as returned by the query
    #[serde(default)]
    pub row: Row,
}

/// Read a warehouse value as a number.
///
/// The warehouse CLI returns numbers as JSON strings, so strings are parsed
/// too. Booleans map to 1/0. `null` and anything else yield `None`.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_as_f64_accepts_numbers_and_strings() {
        assert_eq!(value_as_f64(&json!(3)), Some(3.0));
        assert_eq!(value_as_f64(&json!(2.5)), Some(2.5));
        assert_eq!(value_as_f64(&json!("1000")), Some(1000.0));
        assert_eq!(value_as_f64(&json!(true)), Some(1.0));
    }

    #[test]
    fn test_value_as_f64_rejects_null_and_text() {
        assert_eq!(value_as_f64(&Value::Null), None);
        assert_eq!(value_as_f64(&json!("n/a")), None);
        assert_eq!(value_as_f64(&json!([1])), None);
    }

    #[test]
    fn test_check_result_serializes_without_empty_options() {
        let result = CheckResult {
            id: CheckResultId::new(),
            run_id: RunId::new(),
            check_name: "data_freshness_sli".to_string(),
            subject: None,
            measured_value: 2.0,
            threshold: None,
            passed: true,
            evaluated_at: chrono::Utc::now(),
            row: Row::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("subject").is_none());
        assert!(json.get("threshold").is_none());
        assert_eq!(json["passed"], true);
    }
}
