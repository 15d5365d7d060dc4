//! Row evaluation for check results.

use dqmon_core::{
    value_as_f64, CheckDefinition, CheckResult, CheckResultId, Evaluation, Row, RunId, Time,
};
use serde_json::Value;

use crate::engine::CheckError;

/// Evaluate one query row against a check's rule.
///
/// The measured value must be present and numeric. A query-embedded threshold
/// that is `NULL` fails the row rather than erroring, so domains without an
/// expected count can be reported failing.
pub fn evaluate_row(
    check: &CheckDefinition,
    row: Row,
    run_id: RunId,
    evaluated_at: Time,
) -> Result<CheckResult, CheckError> {
    let measured_value = number(check, &row, &check.value_column)?;

    let (passed, threshold) = match &check.evaluation {
        Evaluation::Static { comparison, bound } => (comparison.holds(measured_value, *bound), Some(*bound)),
        Evaluation::Column { comparison, column } => {
            match row.get(column) {
                None => {
                    return Err(CheckError::MissingColumn {
                        check: check.name.clone(),
                        column: column.clone(),
                    })
                }
                Some(value) => match value_as_f64(value) {
                    Some(bound) => (comparison.holds(measured_value, bound), Some(bound)),
                    None => (false, None),
                },
            }
        }
        Evaluation::Indicator { column } => (number(check, &row, column)? != 0.0, None),
    };

    let subject = check
        .subject_column
        .as_ref()
        .and_then(|c| row.get(c))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        });

    Ok(CheckResult {
        id: CheckResultId::new(),
        run_id,
        check_name: check.name.clone(),
        subject,
        measured_value,
        threshold,
        passed,
        evaluated_at,
        row,
    })
}

/// Fraction of rows that passed; `0.0` for no rows.
pub fn sli(results: &[CheckResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let passed = results.iter().filter(|r| r.passed).count();
    passed as f64 / results.len() as f64
}

fn number(check: &CheckDefinition, row: &Row, column: &str) -> Result<f64, CheckError> {
    row.get(column)
        .and_then(value_as_f64)
        .ok_or_else(|| CheckError::MissingColumn {
            check: check.name.clone(),
            column: column.to_string(),
        })
}
