//! Data quality reconciliation over an imported dataset.
//!
//! Runs a battery of cheap consistency checks (row count vs metadata, NULL
//! share per numeric column, date plausibility, duplicate keys, SUM sanity)
//! against the materialized table and reports pass/warn/fail/error per
//! check plus an overall health verdict. Nothing here blocks analytics; the
//! report tells the consultant what to look at before trusting the numbers.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dsl::sanitize_identifier;
use crate::exec::catalog::DatasetTable;
use crate::exec::ExecResult;
use crate::model::DataType;

// ============================================================================
// Thresholds
// ============================================================================

pub mod thresholds {
    /// Row count discrepancy above this share of the expected count fails.
    pub const ROW_COUNT_FAIL_PERCENT: f64 = 1.0;
    /// NULL share above this in a numeric column fails; anything nonzero
    /// below it warns.
    pub const NULL_FAIL_PERCENT: f64 = 5.0;
    /// Dates outside now ± this many years are implausible.
    pub const DATE_WINDOW_YEARS: i32 = 10;
    /// SUM sanity runs over at most this many numeric columns.
    pub const SUM_CHECK_COLUMNS: usize = 3;
}

// ============================================================================
// Report types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationCheck {
    pub name: String,
    pub status: CheckStatus,
    pub expected: Option<serde_json::Value>,
    pub actual: Option<serde_json::Value>,
    pub discrepancy_percent: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warnings,
    Issues,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CheckSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub dataset_id: i64,
    pub run_at: DateTime<Utc>,
    pub checks: Vec<ReconciliationCheck>,
    pub summary: CheckSummary,
    pub overall: HealthStatus,
}

/// Fold check outcomes into the overall verdict. Any error, or failures in
/// half the checks, is critical.
pub fn summarize(checks: &[ReconciliationCheck]) -> (CheckSummary, HealthStatus) {
    let summary = CheckSummary {
        total: checks.len(),
        passed: checks.iter().filter(|c| c.status == CheckStatus::Pass).count(),
        failed: checks.iter().filter(|c| c.status == CheckStatus::Fail).count(),
        warnings: checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warning)
            .count(),
        errors: checks
            .iter()
            .filter(|c| c.status == CheckStatus::Error)
            .count(),
    };
    let overall = if summary.errors > 0 || summary.failed as f64 >= summary.total as f64 * 0.5 {
        HealthStatus::Critical
    } else if summary.failed > 0 {
        HealthStatus::Issues
    } else if summary.warnings > 0 {
        HealthStatus::Warnings
    } else {
        HealthStatus::Healthy
    };
    (summary, overall)
}

// ============================================================================
// Pure classification helpers
// ============================================================================

pub fn classify_row_count(expected: u64, actual: u64) -> ReconciliationCheck {
    let discrepancy = expected.abs_diff(actual);
    let percent = if expected > 0 {
        discrepancy as f64 / expected as f64 * 100.0
    } else {
        0.0
    };
    let status = if discrepancy == 0 {
        CheckStatus::Pass
    } else if percent <= thresholds::ROW_COUNT_FAIL_PERCENT {
        CheckStatus::Warning
    } else {
        CheckStatus::Fail
    };
    ReconciliationCheck {
        name: "row_count".to_string(),
        status,
        expected: Some(expected.into()),
        actual: Some(actual.into()),
        discrepancy_percent: Some(percent),
        message: match status {
            CheckStatus::Pass => format!("row count matches metadata: {actual}"),
            _ => format!("row count mismatch: expected {expected}, found {actual} ({percent:.2}%)"),
        },
    }
}

pub fn classify_null_share(column: &str, total: u64, null_count: u64) -> ReconciliationCheck {
    let percent = if total > 0 {
        null_count as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let status = if null_count == 0 {
        CheckStatus::Pass
    } else if percent <= thresholds::NULL_FAIL_PERCENT {
        CheckStatus::Warning
    } else {
        CheckStatus::Fail
    };
    ReconciliationCheck {
        name: format!("null_check_{column}"),
        status,
        expected: Some(0.into()),
        actual: Some(null_count.into()),
        discrepancy_percent: Some(percent),
        message: match status {
            CheckStatus::Pass => format!("column '{column}': no NULL values"),
            _ => format!("column '{column}': {null_count} of {total} NULL ({percent:.1}%)"),
        },
    }
}

pub fn classify_date_range(
    column: &str,
    min: Option<NaiveDate>,
    max: Option<NaiveDate>,
    today: NaiveDate,
) -> ReconciliationCheck {
    let (Some(min), Some(max)) = (min, max) else {
        return ReconciliationCheck {
            name: format!("date_range_{column}"),
            status: CheckStatus::Warning,
            expected: None,
            actual: None,
            discrepancy_percent: None,
            message: format!("column '{column}': no valid dates found"),
        };
    };
    let floor = today.with_year(today.year() - thresholds::DATE_WINDOW_YEARS);
    let ceiling = today.with_year(today.year() + thresholds::DATE_WINDOW_YEARS);
    let mut issues = Vec::new();
    if floor.is_some_and(|f| min < f) {
        issues.push(format!("dates too old (min {min})"));
    }
    if ceiling.is_some_and(|c| max > c) {
        issues.push(format!("suspicious future dates (max {max})"));
    }
    ReconciliationCheck {
        name: format!("date_range_{column}"),
        status: if issues.is_empty() {
            CheckStatus::Pass
        } else {
            CheckStatus::Warning
        },
        expected: None,
        actual: Some(format!("{min}..{max}").into()),
        discrepancy_percent: None,
        message: if issues.is_empty() {
            format!("column '{column}': plausible range ({min} to {max})")
        } else {
            format!("column '{column}': {}", issues.join(", "))
        },
    }
}

fn error_check(name: &str, err: impl std::fmt::Display) -> ReconciliationCheck {
    ReconciliationCheck {
        name: name.to_string(),
        status: CheckStatus::Error,
        expected: None,
        actual: None,
        discrepancy_percent: None,
        message: format!("check failed: {err}"),
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Run every check against a resolved dataset table. Individual check
/// errors are recorded in the report rather than aborting the run.
pub async fn run_reconciliation(
    pool: &Pool,
    table: &DatasetTable,
) -> ExecResult<ReconciliationReport> {
    let mut checks = Vec::new();
    let quoted_table = sanitize_identifier(&table.table_name)?;

    let numeric_columns: Vec<&String> = table
        .columns
        .iter()
        .filter(|c| table.column_type(c).is_some_and(|t| t.is_numeric()))
        .collect();
    let date_columns: Vec<&String> = table
        .columns
        .iter()
        .filter(|c| table.column_type(c) == Some(DataType::Date))
        .collect();
    let key_columns: Vec<&String> = table
        .columns
        .iter()
        .filter(|c| {
            let lower = c.to_lowercase();
            lower.contains("id") || lower.contains("cod")
        })
        .take(2)
        .collect();

    let client = pool.get().await?;

    // Row count vs import metadata.
    match client
        .query_one(&format!("SELECT COUNT(*) FROM {quoted_table}"), &[])
        .await
    {
        Ok(row) => {
            let actual: i64 = row.get(0);
            checks.push(classify_row_count(table.row_count, actual as u64));
        }
        Err(err) => checks.push(error_check("row_count", err)),
    }

    // NULL share per numeric column.
    for column in &numeric_columns {
        let quoted = sanitize_identifier(column)?;
        match client
            .query_one(
                &format!(
                    "SELECT COUNT(*), COUNT(*) - COUNT({quoted}) FROM {quoted_table}"
                ),
                &[],
            )
            .await
        {
            Ok(row) => {
                let total: i64 = row.get(0);
                let nulls: i64 = row.get(1);
                checks.push(classify_null_share(column, total as u64, nulls as u64));
            }
            Err(err) => checks.push(error_check(&format!("null_check_{column}"), err)),
        }
    }

    // Date plausibility window.
    let today = Utc::now().date_naive();
    for column in &date_columns {
        let quoted = sanitize_identifier(column)?;
        match client
            .query_one(
                &format!(
                    "SELECT MIN({quoted}::date), MAX({quoted}::date)
                     FROM {quoted_table} WHERE {quoted} IS NOT NULL"
                ),
                &[],
            )
            .await
        {
            Ok(row) => {
                checks.push(classify_date_range(column, row.get(0), row.get(1), today));
            }
            Err(err) => checks.push(error_check(&format!("date_range_{column}"), err)),
        }
    }

    // Duplicate key combinations.
    if !key_columns.is_empty() {
        let quoted_keys = key_columns
            .iter()
            .map(|c| sanitize_identifier(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        match client
            .query(
                &format!(
                    "SELECT COUNT(*) AS dup_count FROM {quoted_table}
                     GROUP BY {quoted_keys} HAVING COUNT(*) > 1 LIMIT 10"
                ),
                &[],
            )
            .await
        {
            Ok(rows) => {
                let status = if rows.is_empty() {
                    CheckStatus::Pass
                } else {
                    CheckStatus::Warning
                };
                checks.push(ReconciliationCheck {
                    name: "duplicates".to_string(),
                    status,
                    expected: Some(0.into()),
                    actual: Some(rows.len().into()),
                    discrepancy_percent: None,
                    message: if rows.is_empty() {
                        "no duplicate key combinations".to_string()
                    } else {
                        format!("{} duplicate key combinations found", rows.len())
                    },
                });
            }
            Err(err) => checks.push(error_check("duplicates", err)),
        }
    }

    // SUM sanity over the first few numeric columns: an all-NULL or all-zero
    // column usually means a broken import.
    for column in numeric_columns.iter().take(thresholds::SUM_CHECK_COLUMNS) {
        let quoted = sanitize_identifier(column)?;
        match client
            .query_one(
                &format!("SELECT SUM(CAST({quoted} AS NUMERIC))::float8 FROM {quoted_table}"),
                &[],
            )
            .await
        {
            Ok(row) => {
                let sum: Option<f64> = row.get(0);
                let status = match sum {
                    Some(v) if v != 0.0 => CheckStatus::Pass,
                    _ => CheckStatus::Warning,
                };
                checks.push(ReconciliationCheck {
                    name: format!("sum_check_{column}"),
                    status,
                    expected: None,
                    actual: sum.map(Into::into),
                    discrepancy_percent: None,
                    message: match sum {
                        Some(v) if v != 0.0 => format!("column '{column}': SUM = {v}"),
                        _ => format!(
                            "column '{column}': SUM is zero or NULL, possibly broken import"
                        ),
                    },
                });
            }
            Err(err) => checks.push(error_check(&format!("sum_check_{column}"), err)),
        }
    }

    let (summary, overall) = summarize(&checks);
    info!(
        dataset_id = table.dataset_id,
        passed = summary.passed,
        total = summary.total,
        status = ?overall,
        "reconciliation finished"
    );
    Ok(ReconciliationReport {
        dataset_id: table.dataset_id,
        run_at: Utc::now(),
        checks,
        summary,
        overall,
    })
}
