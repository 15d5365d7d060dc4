//! Check model - what a quality check queries, where it writes, and how it passes.

use serde::{Deserialize, Serialize};

/// A named data-quality check.
///
/// Definitions are built at configuration time and never mutated; every run
/// renders the query template against that run's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Check name, also the stem of its task ids
    pub name: String,

    /// Name reported on the metric log line
    pub metric_name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Query template (`{{ project_id }}`, `{{ env }}`, `{{ var.NAME }}`)
    pub query: String,

    /// Results table the rows are appended to
    pub destination: Destination,

    /// Write mode for the destination
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Column holding the measured value
    pub value_column: String,

    /// Column naming what the row measures (table, domain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_column: Option<String>,

    /// How a row's pass/fail is decided
    pub evaluation: Evaluation,
}

impl CheckDefinition {
    /// Create a check with an append destination and no subject column.
    pub fn new(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        query: impl Into<String>,
        destination: Destination,
        value_column: impl Into<String>,
        evaluation: Evaluation,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.into(),
            description: String::new(),
            query: query.into(),
            destination,
            write_mode: WriteMode::Append,
            value_column: value_column.into(),
            subject_column: None,
            evaluation,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the subject column.
    pub fn with_subject_column(mut self, column: impl Into<String>) -> Self {
        self.subject_column = Some(column.into());
        self
    }
}

/// Destination table for check results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Dataset (may contain template placeholders)
    pub dataset: String,

    /// Table name
    pub table: String,
}

impl Destination {
    /// Create a destination.
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// `dataset.table`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Write mode for result rows. Only appends are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert new rows, never touching existing ones
    #[default]
    Append,
}

/// Direction of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Passes when measured >= bound
    AtLeast,
    /// Passes when measured <= bound
    AtMost,
}

impl Comparison {
    /// Whether `measured` satisfies `bound`. Equality passes.
    pub fn holds(&self, measured: f64, bound: f64) -> bool {
        match self {
            Comparison::AtLeast => measured >= bound,
            Comparison::AtMost => measured <= bound,
        }
    }

    /// Operator symbol for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::AtLeast => ">=",
            Comparison::AtMost => "<=",
        }
    }
}

/// Rule deciding whether a result row passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evaluation {
    /// Compare the measured value against a constant
    Static {
        /// Comparison direction
        comparison: Comparison,
        /// Threshold
        bound: f64,
    },

    /// Compare the measured value against another column of the same row
    Column {
        /// Comparison direction
        comparison: Comparison,
        /// Column holding the threshold
        column: String,
    },

    /// The query already computed a 1/0 indicator
    Indicator {
        /// Indicator column
        column: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_least_equality_passes() {
        assert!(Comparison::AtLeast.holds(1000.0, 1000.0));
        assert!(Comparison::AtLeast.holds(1001.0, 1000.0));
        assert!(!Comparison::AtLeast.holds(999.0, 1000.0));
    }

    #[test]
    fn test_at_most_equality_passes() {
        assert!(Comparison::AtMost.holds(2.0, 2.0));
        assert!(!Comparison::AtMost.holds(3.0, 2.0));
    }

    #[test]
    fn test_destination_qualified() {
        let dest = Destination::new("monitoring_dev", "data_freshness_sli");
        assert_eq!(dest.qualified(), "monitoring_dev.data_freshness_sli");
        assert_eq!(dest.to_string(), dest.qualified());
    }

    #[test]
    fn test_evaluation_serde_tagged() {
        let eval = Evaluation::Static {
            comparison: Comparison::AtMost,
            bound: 2.0,
        };
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["type"], "static");
        assert_eq!(json["comparison"], "at_most");

        let back: Evaluation = serde_json::from_value(json).unwrap();
        assert_eq!(back, eval);
    }

    #[test]
    fn test_write_mode_defaults_to_append() {
        assert_eq!(WriteMode::default(), WriteMode::Append);
    }
}
