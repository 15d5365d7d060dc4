//! Built-in SLI checks.
//!
//! Both checks read the warehouse's table-storage metadata for schemas of the
//! run's environment and append their rows to `monitoring_<env>`.

use dqmon_core::{CheckDefinition, Comparison, Destination, Evaluation};
use serde::{Deserialize, Serialize};

/// Dataset template all built-in checks write to.
pub const MONITORING_DATASET: &str = "monitoring_{{ env }}";

/// Maximum hours since last modification for a table to count as fresh.
pub const FRESHNESS_MAX_HOURS: f64 = 2.0;

/// Table freshness: hours since each environment table was last modified.
pub fn freshness_check() -> CheckDefinition {
    let query = format!(
        r#"WITH freshness_check AS (
  SELECT
    table_name,
    TIMESTAMP_DIFF(CURRENT_TIMESTAMP(), last_modified_time, HOUR) AS hours_since_update,
    CASE
      WHEN TIMESTAMP_DIFF(CURRENT_TIMESTAMP(), last_modified_time, HOUR) <= {max_hours} THEN 1
      ELSE 0
    END AS freshness_sli
  FROM `{{{{ project_id }}}}`.`region-us`.INFORMATION_SCHEMA.TABLE_STORAGE
  WHERE table_schema LIKE '%_{{{{ env }}}}'
)
SELECT
  table_name,
  hours_since_update,
  freshness_sli,
  CURRENT_TIMESTAMP() AS check_timestamp
FROM freshness_check"#,
        max_hours = FRESHNESS_MAX_HOURS as i64,
    );

    CheckDefinition::new(
        "data_freshness_sli",
        "freshness",
        query,
        Destination::new(MONITORING_DATASET, "data_freshness_sli"),
        "hours_since_update",
        Evaluation::Static {
            comparison: Comparison::AtMost,
            bound: FRESHNESS_MAX_HOURS,
        },
    )
    .with_description("Data is updated within the expected window")
    .with_subject_column("table_name")
}

/// Expected minimum row count for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainThreshold {
    /// Domain name
    pub domain: String,
    /// Minimum rows the domain's external table must hold
    pub expected_min_rows: u64,
}

impl DomainThreshold {
    /// Create a threshold.
    pub fn new(domain: impl Into<String>, expected_min_rows: u64) -> Self {
        Self {
            domain: domain.into(),
            expected_min_rows,
        }
    }
}

/// What to do with domains that have no expected row count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingThresholdPolicy {
    /// Leave them out of the check
    #[default]
    Skip,
    /// Report them as failing
    FailClosed,
}

/// Settings for the completeness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessConfig {
    /// Per-domain expected minimums
    pub thresholds: Vec<DomainThreshold>,

    /// Domains to cover under `FailClosed`
    #[serde(default)]
    pub domains: Vec<String>,

    /// Handling of domains without a threshold
    #[serde(default)]
    pub missing_threshold: MissingThresholdPolicy,
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![
                DomainThreshold::new("admissions", 1000),
                DomainThreshold::new("labs", 5000),
                DomainThreshold::new("pharmacy", 2000),
            ],
            domains: dqmon_core::DOMAINS.iter().map(|d| d.to_string()).collect(),
            missing_threshold: MissingThresholdPolicy::Skip,
        }
    }
}

impl CompletenessConfig {
    /// `(domain, expected)` pairs the query will cover, thresholds first.
    pub fn expected_rows(&self) -> Vec<(String, Option<u64>)> {
        let mut rows: Vec<(String, Option<u64>)> = self
            .thresholds
            .iter()
            .map(|t| (t.domain.clone(), Some(t.expected_min_rows)))
            .collect();

        if self.missing_threshold == MissingThresholdPolicy::FailClosed {
            for domain in &self.domains {
                if !self.thresholds.iter().any(|t| &t.domain == domain) {
                    rows.push((domain.clone(), None));
                }
            }
        }
        rows
    }
}

/// Row completeness: actual rows in each domain's external table against its
/// expected minimum. Domains with no table coalesce to zero rows.
pub fn completeness_check(config: &CompletenessConfig) -> CheckDefinition {
    let expected = config
        .expected_rows()
        .into_iter()
        .map(|(domain, min)| {
            let min = match min {
                Some(n) => n.to_string(),
                None => "CAST(NULL AS INT64)".to_string(),
            };
            format!(
                "SELECT '{}' AS domain, {} AS expected_min_rows",
                sql_string(&domain),
                min
            )
        })
        .collect::<Vec<_>>()
        .join("\n  UNION ALL ");

    let query = format!(
        r#"WITH expected_counts AS (
  {expected}
),
actual_counts AS (
  SELECT
    REGEXP_EXTRACT(table_name, r'^(.+)_external$') AS domain,
    row_count
  FROM `{{{{ project_id }}}}`.`region-us`.INFORMATION_SCHEMA.TABLE_STORAGE
  WHERE table_schema LIKE '%_{{{{ env }}}}'
    AND table_name LIKE '%_external'
)
SELECT
  e.domain,
  e.expected_min_rows,
  COALESCE(a.row_count, 0) AS actual_rows,
  CASE
    WHEN e.expected_min_rows IS NOT NULL
      AND COALESCE(a.row_count, 0) >= e.expected_min_rows THEN 1
    ELSE 0
  END AS completeness_sli,
  CURRENT_TIMESTAMP() AS check_timestamp
FROM expected_counts e
LEFT JOIN actual_counts a ON e.domain = a.domain"#
    );

    CheckDefinition::new(
        "data_completeness_sli",
        "completeness",
        query,
        Destination::new(MONITORING_DATASET, "data_completeness_sli"),
        "actual_rows",
        Evaluation::Column {
            comparison: Comparison::AtLeast,
            column: "expected_min_rows".to_string(),
        },
    )
    .with_description("Domains hold at least their expected row counts")
    .with_subject_column("domain")
}

/// The default check set.
pub fn default_checks(completeness: &CompletenessConfig) -> Vec<CheckDefinition> {
    vec![freshness_check(), completeness_check(completeness)]
}

fn sql_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
