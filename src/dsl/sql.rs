//! Translation of validated metrics into parameterized SQL.
//!
//! Column and table names are interpolated only after sanitization strips
//! everything outside `[a-zA-Z0-9_]`; filter values never touch the SQL text
//! and always travel as `$n` parameters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dsl::ast::{ColumnArg, FilterValue, MetricExpr};
use crate::dsl::{DslError, DslResult, ValidatedMetric};

/// A bind parameter for the generated statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Number(f64),
    Text(String),
}

impl From<&FilterValue> for SqlParam {
    fn from(value: &FilterValue) -> Self {
        match value {
            FilterValue::Number(n) => SqlParam::Number(*n),
            FilterValue::Text(s) => SqlParam::Text(s.clone()),
        }
    }
}

/// A compiled metric: one SELECT plus its bind parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSql {
    pub sql: String,
    pub parameters: Vec<SqlParam>,
}

/// Strip a name to `[a-zA-Z0-9_]` and quote it. Empty results and names
/// starting with a digit are rejected rather than guessed at.
pub fn sanitize_identifier(name: &str) -> DslResult<String> {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if sanitized.is_empty() || sanitized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(DslError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{sanitized}\""))
}

fn expression_to_sql(expr: &MetricExpr) -> DslResult<String> {
    match expr {
        MetricExpr::Literal { value } => Ok(format_number(*value)),
        MetricExpr::Aggregate { function, column } => {
            let col = match column {
                ColumnArg::Star => "*".to_string(),
                ColumnArg::Named(name) => sanitize_identifier(name)?,
            };
            Ok(match function {
                crate::dsl::ast::AggregateFn::CountDistinct => format!("COUNT(DISTINCT {col})"),
                other => format!("{}({col})", other.as_str()),
            })
        }
        MetricExpr::Binary {
            operator,
            left,
            right,
        } => Ok(format!(
            "({} {} {})",
            expression_to_sql(left)?,
            operator.as_str(),
            expression_to_sql(right)?
        )),
    }
}

/// Integral literals render without a trailing `.0` so the SQL matches what
/// a human would have typed.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Compile a valid metric against a staging table.
pub fn translate(metric: &ValidatedMetric, table_name: &str) -> DslResult<MetricSql> {
    if !metric.is_valid {
        return Err(DslError::InvalidMetric {
            errors: metric.errors.join(", "),
        });
    }

    let table = sanitize_identifier(table_name)?;
    let select_expr = expression_to_sql(&metric.expression)?;

    let group_cols: Vec<String> = match &metric.group_by {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| sanitize_identifier(c))
            .collect::<DslResult<_>>()?,
        _ => Vec::new(),
    };

    let mut sql = if group_cols.is_empty() {
        format!("SELECT {select_expr} AS result")
    } else {
        format!("SELECT {}, {select_expr} AS result", group_cols.join(", "))
    };
    sql.push_str(&format!(" FROM {table}"));

    let mut parameters = Vec::new();
    if !metric.filters.is_empty() {
        let mut clauses = Vec::new();
        for (i, filter) in metric.filters.iter().enumerate() {
            let col = sanitize_identifier(&filter.column)?;
            let op = filter.operator.as_str();
            // Bind parameters carry explicit casts: we send every value as
            // FLOAT8 or TEXT, while the staged column may be NUMERIC,
            // INTEGER or DATE. Casting the column to text keeps comparisons
            // valid on any column type (DATE renders as ISO-8601, which
            // orders lexicographically).
            let clause = match filter.value {
                FilterValue::Number(_) => format!("{col} {op} ${}::float8", i + 1),
                FilterValue::Text(_) => format!("{col}::text {op} ${}::text", i + 1),
            };
            clauses.push(clause);
            parameters.push(SqlParam::from(&filter.value));
        }
        sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
    }

    if !group_cols.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", group_cols.join(", ")));
    }

    Ok(MetricSql { sql, parameters })
}

/// Cache key: SHA-256 over the canonical JSON of the statement and its
/// parameters. Same SQL, same params, same key, regardless of who asked.
pub fn compute_query_hash(sql: &str, parameters: &[SqlParam]) -> String {
    #[derive(Serialize)]
    struct HashInput<'a> {
        sql: &'a str,
        params: &'a [SqlParam],
    }
    let canonical = serde_json::to_string(&HashInput {
        sql,
        params: parameters,
    })
    .unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}
