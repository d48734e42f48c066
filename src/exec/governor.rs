//! Pre-execution safety checks and structured SQL fragment builders.
//!
//! Everything here is pure: the executor hands it validated column names and
//! planner arguments, and gets back either SQL fragments with bind
//! parameters or a structured refusal. The two injection-prone filter
//! families (sellability, category patterns) are built from enums and bound
//! parameters only; no caller-supplied text ever reaches the SQL string.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dsl::sanitize_identifier;
use crate::dsl::{AggregateFn, ComparisonOp, FilterValue, SqlParam};
use crate::exec::{ExecError, ExecResult};
use crate::model::DataType;

// ============================================================================
// Limits
// ============================================================================

pub mod limits {
    /// Result cap for grouped aggregations.
    pub const MAX_GROUP_BY_ROWS: i64 = 500;
    /// Result cap for row-scan filters.
    pub const MAX_FILTER_ROWS: i64 = 1000;
    /// GROUP BY wider than this explodes row counts.
    pub const MAX_GROUP_BY_COLUMNS: usize = 3;
    /// Per-statement timeout for automated callers.
    pub const STATEMENT_TIMEOUT_MS: u64 = 3000;
}

/// Clamp a requested limit to its cap, loudly.
pub fn enforce_limit(requested: i64, cap: i64) -> i64 {
    if requested > cap {
        warn!(requested, cap, "limit exceeds hard cap, clamping");
        cap
    } else if requested <= 0 {
        cap
    } else {
        requested
    }
}

// ============================================================================
// Cardinality gate
// ============================================================================

/// How a blocked aggregation can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationOption {
    TopN,
    Export,
    Paginate,
    Proceed,
}

/// Structured "needs confirmation" response. Not an error: the caller is
/// expected to pick a remediation and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardinalityWarning {
    pub needs_confirmation: bool,
    pub distinct_count: i64,
    pub row_cap: i64,
    pub options: Vec<RemediationOption>,
}

/// Verdict of the pre-aggregation `COUNT(DISTINCT col)` probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CardinalityDecision {
    Proceed { distinct_count: i64 },
    NeedsConfirmation(CardinalityWarning),
}

pub fn gate_cardinality(distinct_count: i64, row_cap: i64) -> CardinalityDecision {
    if distinct_count <= row_cap {
        CardinalityDecision::Proceed { distinct_count }
    } else {
        CardinalityDecision::NeedsConfirmation(CardinalityWarning {
            needs_confirmation: true,
            distinct_count,
            row_cap,
            options: vec![
                RemediationOption::TopN,
                RemediationOption::Export,
                RemediationOption::Paginate,
                RemediationOption::Proceed,
            ],
        })
    }
}

/// Gate a multi-column GROUP BY on the widest of its columns. The grouped
/// row count is at least the largest per-column distinct count, so one
/// low-cardinality leading column must not wave through a high-cardinality
/// one behind it.
pub fn gate_group_cardinality(distinct_counts: &[i64], row_cap: i64) -> CardinalityDecision {
    let widest = distinct_counts.iter().copied().max().unwrap_or(0);
    gate_cardinality(widest, row_cap)
}

// ============================================================================
// Date truncation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DateGrain {
    pub fn parse(text: &str) -> Option<DateGrain> {
        match text.to_lowercase().as_str() {
            "day" => Some(DateGrain::Day),
            "week" => Some(DateGrain::Week),
            "month" => Some(DateGrain::Month),
            "quarter" => Some(DateGrain::Quarter),
            "year" => Some(DateGrain::Year),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            DateGrain::Day => "day",
            DateGrain::Week => "week",
            DateGrain::Month => "month",
            DateGrain::Quarter => "quarter",
            DateGrain::Year => "year",
        }
    }

    /// `DATE_TRUNC('month', "col"::timestamp)`.
    pub fn truncate(&self, column: &str) -> ExecResult<String> {
        let quoted = sanitize_identifier(column)?;
        Ok(format!(
            "DATE_TRUNC('{}', {quoted}::timestamp)",
            self.as_sql()
        ))
    }
}

// ============================================================================
// Aggregations
// ============================================================================

/// One aggregation in an `aggregate_group` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    /// `None` means `*`, accepted only for COUNT.
    pub column: Option<String>,
    pub function: AggregateFn,
    pub alias: Option<String>,
}

impl Aggregation {
    /// The output column name: explicit alias or `func_column`.
    pub fn effective_alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| {
            format!(
                "{}_{}",
                self.function.as_str().to_lowercase(),
                self.column.as_deref().unwrap_or("all")
            )
        })
    }

    /// Render `FUNC(arg) AS "alias"`. Numeric columns are cast so text-typed
    /// imports still aggregate.
    pub fn to_select_part(&self, column_type: Option<DataType>) -> ExecResult<String> {
        let arg = match &self.column {
            None => {
                if self.function != AggregateFn::Count {
                    return Err(ExecError::InvalidArgument {
                        message: format!("{} requires a column", self.function.as_str()),
                    });
                }
                "*".to_string()
            }
            Some(name) => {
                let quoted = sanitize_identifier(name)?;
                let numeric = column_type.is_some_and(|t| t.is_numeric());
                let wants_cast = matches!(
                    self.function,
                    AggregateFn::Sum | AggregateFn::Avg | AggregateFn::Min | AggregateFn::Max
                );
                if numeric && wants_cast {
                    format!("CAST({quoted} AS NUMERIC)")
                } else {
                    quoted
                }
            }
        };
        let alias = sanitize_identifier(&self.effective_alias())?;
        Ok(match self.function {
            AggregateFn::CountDistinct => format!("COUNT(DISTINCT {arg}) AS {alias}"),
            other => format!("{}({arg}) AS {alias}", other.as_str()),
        })
    }
}

// ============================================================================
// Filters
// ============================================================================

/// One planner-supplied filter condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub column: String,
    pub operator: ComparisonOp,
    pub value: FilterValue,
}

/// Render a filter as `clause` + bind parameter. String equality is
/// rewritten case-insensitive: spreadsheet data is inconsistently cased and
/// planners ask for "Cibo" when the table says "CIBO".
///
/// Every placeholder carries an explicit cast. Values only ever travel as
/// FLOAT8 or TEXT, while the staged column may be NUMERIC, INTEGER or DATE;
/// without the cast Postgres infers the column's type for the placeholder
/// and rejects the bind at execute time.
pub fn filter_clause(
    filter: &FilterSpec,
    column_type: Option<DataType>,
    param_index: usize,
) -> ExecResult<(String, SqlParam)> {
    let quoted = sanitize_identifier(&filter.column)?;
    let param = SqlParam::from(&filter.value);
    let op = filter.operator.as_str();
    let clause = match &filter.value {
        FilterValue::Number(_) => format!("{quoted} {op} ${param_index}::float8"),
        FilterValue::Text(_) => {
            if matches!(filter.operator, ComparisonOp::Eq | ComparisonOp::Neq) {
                format!("LOWER({quoted}::text) {op} LOWER(${param_index}::text)")
            } else if column_type == Some(DataType::Date) {
                // Date bounds arrive as ISO-8601 text; compare as dates so
                // range filters stay correct even on text-typed imports.
                format!("{quoted}::date {op} ${param_index}::text::date")
            } else {
                format!("{quoted}::text {op} ${param_index}::text")
            }
        }
    };
    Ok((clause, param))
}

// ============================================================================
// Structured filter families
// ============================================================================

/// Sellability filtering over the `is_sellable` / `line_type` roles.
/// Enum-driven: the generated SQL contains only constants chosen here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellabilityFilter {
    /// Keep only real sellable products.
    SellableOnly,
    /// Keep only modifiers and notes (the complement).
    NonSellableOnly,
}

impl SellabilityFilter {
    /// Build the clause against whichever sellability column the dataset
    /// actually has. `is_sellable` wins over `line_type` when both exist.
    pub fn to_clause(
        &self,
        is_sellable_column: Option<&str>,
        line_type_column: Option<&str>,
    ) -> ExecResult<Option<String>> {
        if let Some(column) = is_sellable_column {
            let quoted = sanitize_identifier(column)?;
            return Ok(Some(match self {
                SellabilityFilter::SellableOnly => {
                    format!("CAST({quoted} AS NUMERIC) = 1")
                }
                SellabilityFilter::NonSellableOnly => {
                    format!("CAST({quoted} AS NUMERIC) = 0")
                }
            }));
        }
        if let Some(column) = line_type_column {
            let quoted = sanitize_identifier(column)?;
            return Ok(Some(match self {
                SellabilityFilter::SellableOnly => {
                    format!("LOWER({quoted}::text) = 'product'")
                }
                SellabilityFilter::NonSellableOnly => {
                    format!("LOWER({quoted}::text) <> 'product'")
                }
            }));
        }
        // Dataset has no sellability signal; nothing to filter on.
        Ok(None)
    }
}

/// Category include/exclude pattern sets. Patterns always travel as bind
/// parameters; the SQL text carries only placeholders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatternFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl CategoryPatternFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Build `(col ILIKE $i OR ...) AND col NOT ILIKE $j AND ...` starting
    /// at `param_index`. Returns the clause and the parameters consumed.
    pub fn to_clause(
        &self,
        category_column: &str,
        param_index: usize,
    ) -> ExecResult<(String, Vec<SqlParam>)> {
        let quoted = sanitize_identifier(category_column)?;
        let mut parts = Vec::new();
        let mut params = Vec::new();
        let mut next = param_index;

        if !self.include.is_empty() {
            let ors: Vec<String> = self
                .include
                .iter()
                .map(|pattern| {
                    let clause = format!("{quoted} ILIKE ${next}");
                    params.push(SqlParam::Text(pattern.clone()));
                    next += 1;
                    clause
                })
                .collect();
            parts.push(format!("({})", ors.join(" OR ")));
        }
        for pattern in &self.exclude {
            parts.push(format!("{quoted} NOT ILIKE ${next}"));
            params.push(SqlParam::Text(pattern.clone()));
            next += 1;
        }

        Ok((parts.join(" AND "), params))
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// ORDER BY may target only a grouped column or a declared aggregate alias;
/// anything else is rejected, not guessed at.
pub fn validate_order_by(
    order_by: &OrderBy,
    group_by: &[String],
    aggregations: &[Aggregation],
) -> ExecResult<String> {
    let known_alias = aggregations
        .iter()
        .any(|a| a.effective_alias() == order_by.column);
    if !group_by.contains(&order_by.column) && !known_alias {
        return Err(ExecError::InvalidArgument {
            message: format!(
                "order by '{}' is neither a grouped column nor an aggregate alias",
                order_by.column
            ),
        });
    }
    let quoted = sanitize_identifier(&order_by.column)?;
    Ok(format!("{quoted} {}", order_by.direction.as_sql()))
}

/// GROUP BY wider than the cap is refused outright.
pub fn validate_group_by_width(group_by: &[String]) -> ExecResult<()> {
    if group_by.len() > limits::MAX_GROUP_BY_COLUMNS {
        return Err(ExecError::InvalidArgument {
            message: format!(
                "too many GROUP BY columns (max {}): {}",
                limits::MAX_GROUP_BY_COLUMNS,
                group_by.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_cardinality_returns_remediation_menu() {
        match gate_cardinality(10_000, limits::MAX_GROUP_BY_ROWS) {
            CardinalityDecision::NeedsConfirmation(warning) => {
                assert!(warning.needs_confirmation);
                assert_eq!(warning.distinct_count, 10_000);
                assert_eq!(warning.options.len(), 4);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert!(matches!(
            gate_cardinality(12, limits::MAX_GROUP_BY_ROWS),
            CardinalityDecision::Proceed { distinct_count: 12 }
        ));
    }

    #[test]
    fn widest_group_column_drives_the_gate() {
        // A narrow leading column must not wave through a wide second one.
        match gate_group_cardinality(&[12, 10_000], limits::MAX_GROUP_BY_ROWS) {
            CardinalityDecision::NeedsConfirmation(warning) => {
                assert_eq!(warning.distinct_count, 10_000);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert!(matches!(
            gate_group_cardinality(&[12, 40], limits::MAX_GROUP_BY_ROWS),
            CardinalityDecision::Proceed { distinct_count: 40 }
        ));
    }

    #[test]
    fn string_equality_is_rewritten_case_insensitive() {
        let filter = FilterSpec {
            column: "categoria".to_string(),
            operator: ComparisonOp::Eq,
            value: FilterValue::Text("Cibo".to_string()),
        };
        let (clause, _) = filter_clause(&filter, Some(DataType::Text), 1).unwrap();
        assert_eq!(clause, "LOWER(\"categoria\"::text) = LOWER($1::text)");

        let numeric = FilterSpec {
            column: "qta".to_string(),
            operator: ComparisonOp::Gte,
            value: FilterValue::Number(2.0),
        };
        let (clause, _) = filter_clause(&numeric, Some(DataType::Integer), 2).unwrap();
        assert_eq!(clause, "\"qta\" >= $2::float8");
    }

    #[test]
    fn date_range_filters_compare_as_dates() {
        let bound = FilterSpec {
            column: "data_doc".to_string(),
            operator: ComparisonOp::Gte,
            value: FilterValue::Text("2024-03-01".to_string()),
        };
        let (clause, param) = filter_clause(&bound, Some(DataType::Date), 1).unwrap();
        assert_eq!(clause, "\"data_doc\"::date >= $1::text::date");
        assert_eq!(param, SqlParam::Text("2024-03-01".to_string()));

        // Ordering on an ordinary text column stays textual.
        let text = FilterSpec {
            column: "stato".to_string(),
            operator: ComparisonOp::Lt,
            value: FilterValue::Text("m".to_string()),
        };
        let (clause, _) = filter_clause(&text, Some(DataType::Text), 2).unwrap();
        assert_eq!(clause, "\"stato\"::text < $2::text");
    }

    #[test]
    fn category_patterns_stay_out_of_the_sql_text() {
        let filter = CategoryPatternFilter {
            include: vec!["%cibo%".to_string(), "%bevande%".to_string()],
            exclude: vec!["%omaggio%".to_string()],
        };
        let (clause, params) = filter.to_clause("categoria", 3).unwrap();
        assert_eq!(
            clause,
            "(\"categoria\" ILIKE $3 OR \"categoria\" ILIKE $4) AND \"categoria\" NOT ILIKE $5"
        );
        assert_eq!(params.len(), 3);
        assert!(!clause.contains("cibo"));
    }

    #[test]
    fn sellability_prefers_is_sellable_over_line_type() {
        let clause = SellabilityFilter::SellableOnly
            .to_clause(Some("vendibile"), Some("tipo_riga"))
            .unwrap()
            .unwrap();
        assert_eq!(clause, "CAST(\"vendibile\" AS NUMERIC) = 1");

        let fallback = SellabilityFilter::SellableOnly
            .to_clause(None, Some("tipo_riga"))
            .unwrap()
            .unwrap();
        assert_eq!(fallback, "LOWER(\"tipo_riga\"::text) = 'product'");

        assert!(SellabilityFilter::NonSellableOnly
            .to_clause(None, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn order_by_restricted_to_group_columns_and_aliases() {
        let aggregations = vec![Aggregation {
            column: Some("importo".to_string()),
            function: AggregateFn::Sum,
            alias: None,
        }];
        let group_by = vec!["categoria".to_string()];

        let ok = validate_order_by(
            &OrderBy {
                column: "sum_importo".to_string(),
                direction: SortDirection::Desc,
            },
            &group_by,
            &aggregations,
        );
        assert_eq!(ok.unwrap(), "\"sum_importo\" DESC");

        let err = validate_order_by(
            &OrderBy {
                column: "prezzo".to_string(),
                direction: SortDirection::Asc,
            },
            &group_by,
            &aggregations,
        );
        assert!(err.is_err());
    }

    #[test]
    fn numeric_columns_are_cast_inside_aggregates() {
        let agg = Aggregation {
            column: Some("importo".to_string()),
            function: AggregateFn::Sum,
            alias: Some("totale".to_string()),
        };
        assert_eq!(
            agg.to_select_part(Some(DataType::Numeric)).unwrap(),
            "SUM(CAST(\"importo\" AS NUMERIC)) AS \"totale\""
        );
        assert_eq!(
            agg.to_select_part(Some(DataType::Text)).unwrap(),
            "SUM(\"importo\") AS \"totale\""
        );
    }

    #[test]
    fn group_by_width_cap() {
        let four: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!(validate_group_by_width(&four).is_err());
        assert!(validate_group_by_width(&four[..3].to_vec()).is_ok());
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(enforce_limit(5000, limits::MAX_FILTER_ROWS), 1000);
        assert_eq!(enforce_limit(100, limits::MAX_FILTER_ROWS), 100);
        assert_eq!(enforce_limit(0, limits::MAX_GROUP_BY_ROWS), 500);
    }
}
