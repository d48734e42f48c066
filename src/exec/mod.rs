//! Governed query execution against staged datasets.
//!
//! Every planner tool call funnels through [`QueryExecutor`]:
//!
//! ```text
//!   ToolCall ──> resolve table ──> build SQL ──> cache? ──> Postgres
//!                (catalog)         (governor)    (single     │
//!                                                 flight)    ▼
//!                                                      QueryOutcome
//! ```
//!
//! The executor never interpolates user values into SQL text: identifiers
//! go through [`sanitize_identifier`] and values travel as bind parameters.
//! Row caps, GROUP BY width, ORDER BY targets and statement timeouts are
//! all enforced here, not left to the planner's good behavior.

pub mod catalog;
pub mod governor;
pub mod metrics;
pub mod reconcile;
pub mod tools;

use std::sync::Arc;
use std::time::Instant;

use deadpool_postgres::Pool;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_postgres::types::ToSql;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheManager, CacheStatus, QueryClass};
use crate::dsl::{
    compute_query_hash, sanitize_identifier, validate_metric, ComparisonOp, DslError,
    FilterCondition, FilterValue, SqlParam, ValidatedMetric,
};
use crate::model::LogicalRole;

pub use catalog::{CatalogRef, DatasetTable, StaticCatalog, TableCatalog, TableCatalogExt};
pub use governor::{
    enforce_limit, gate_cardinality, gate_group_cardinality, limits, Aggregation,
    CardinalityDecision,
    CardinalityWarning, CategoryPatternFilter, DateGrain, FilterSpec, OrderBy, RemediationOption,
    SellabilityFilter, SortDirection,
};
pub use metrics::{template, templates_for_role, MetricTemplate, MetricUnit, RangeRules};
pub use reconcile::{
    run_reconciliation, CheckStatus, HealthStatus, ReconciliationCheck, ReconciliationReport,
};
pub use tools::{DateRange, TimeBucket, ToolCall};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("dataset {dataset_id} is not ready for querying")]
    DatasetNotReady { dataset_id: i64 },

    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("no column is mapped to role '{}'", role.as_str())]
    MissingRole { role: LogicalRole },

    #[error("query failed: {message}")]
    QueryFailed { message: String },

    #[error(transparent)]
    Dsl(#[from] DslError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("connection pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;

// ============================================================================
// Outcomes
// ============================================================================

/// Rows plus execution metadata, as returned to the planner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    /// JSON array of row objects.
    pub rows: Value,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub cached: bool,
}

impl QueryData {
    fn from_cached(rows: Value, elapsed_ms: u64) -> QueryData {
        let row_count = rows.as_array().map(Vec::len).unwrap_or(0);
        QueryData {
            rows,
            row_count,
            execution_time_ms: elapsed_ms,
            cached: true,
        }
    }
}

/// What a tool call produced: either data, or a cardinality warning the
/// caller must answer before the query runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows(QueryData),
    NeedsConfirmation(CardinalityWarning),
}

// ============================================================================
// Executor
// ============================================================================

pub struct QueryExecutor {
    pool: Pool,
    catalog: CatalogRef,
    cache: Option<Arc<CacheManager>>,
}

impl QueryExecutor {
    pub fn new(pool: Pool, catalog: CatalogRef) -> Self {
        QueryExecutor {
            pool,
            catalog,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Route a planner tool call to its handler, with timing around it.
    pub async fn dispatch(&self, call: &ToolCall) -> ExecResult<QueryOutcome> {
        let started = Instant::now();
        info!(
            tool = call.tool_name(),
            dataset_id = call.dataset_id(),
            "dispatching tool call"
        );
        let result = match call {
            ToolCall::QueryMetric { dataset_id, dsl } => self.query_metric(*dataset_id, dsl).await,
            ToolCall::AggregateGroup {
                dataset_id,
                group_by,
                aggregations,
                filters,
                order_by,
                time_bucket,
                limit,
                confirmed,
            } => {
                self.aggregate_group(
                    *dataset_id,
                    group_by,
                    aggregations,
                    filters,
                    order_by.as_ref(),
                    time_bucket.as_ref(),
                    *limit,
                    *confirmed,
                )
                .await
            }
            ToolCall::FilterData {
                dataset_id,
                filters,
                columns,
                limit,
                offset,
            } => {
                self.filter_data(*dataset_id, filters, columns, *limit, *offset)
                    .await
            }
            ToolCall::ComparePeriods {
                dataset_id,
                dsl,
                date_column,
                period1,
                period2,
            } => {
                self.compare_periods(*dataset_id, dsl, date_column, *period1, *period2)
                    .await
            }
            ToolCall::GetSchema { dataset_id } => self.get_schema(*dataset_id).await,
        };
        match &result {
            Ok(_) => debug!(
                tool = call.tool_name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool call finished"
            ),
            Err(err) => warn!(
                tool = call.tool_name(),
                error = %err,
                "tool call failed"
            ),
        }
        result
    }

    // ------------------------------------------------------------------
    // query_metric
    // ------------------------------------------------------------------

    /// Compile a metric DSL expression and run it.
    pub async fn query_metric(&self, dataset_id: i64, dsl: &str) -> ExecResult<QueryOutcome> {
        let metric = validate_metric(dsl);
        let table = self
            .catalog
            .resolve_checked(dataset_id, &metric.referenced_columns)
            .await?;
        let compiled = crate::dsl::translate(&metric, &table.table_name)?;
        let data = self
            .execute_cached(
                dataset_id,
                &compiled.sql,
                &compiled.parameters,
                QueryClass::Aggregation,
            )
            .await?;
        Ok(QueryOutcome::Rows(data))
    }

    // ------------------------------------------------------------------
    // aggregate_group
    // ------------------------------------------------------------------

    /// Grouped aggregation with filters, optional time bucketing and
    /// ordering. High-cardinality group columns stop here with a warning
    /// until the caller confirms.
    #[allow(clippy::too_many_arguments)]
    pub async fn aggregate_group(
        &self,
        dataset_id: i64,
        group_by: &[String],
        aggregations: &[Aggregation],
        filters: &[FilterSpec],
        order_by: Option<&OrderBy>,
        time_bucket: Option<&TimeBucket>,
        limit: Option<i64>,
        confirmed: bool,
    ) -> ExecResult<QueryOutcome> {
        if aggregations.is_empty() {
            return Err(ExecError::InvalidArgument {
                message: "aggregate_group requires at least one aggregation".to_string(),
            });
        }
        governor::validate_group_by_width(group_by)?;

        let mut referenced: Vec<String> = group_by.to_vec();
        referenced.extend(aggregations.iter().filter_map(|a| a.column.clone()));
        referenced.extend(filters.iter().map(|f| f.column.clone()));
        if let Some(bucket) = time_bucket {
            referenced.push(bucket.column.clone());
        }
        let table = self.catalog.resolve_checked(dataset_id, &referenced).await?;

        // Gate on every grouped column before paying for the real query:
        // the grouped row count is at least the widest column's cardinality.
        if !confirmed && !group_by.is_empty() {
            let mut distinct_counts = Vec::with_capacity(group_by.len());
            for column in group_by {
                distinct_counts.push(self.probe_distinct(&table.table_name, column).await?);
            }
            if let CardinalityDecision::NeedsConfirmation(warning) =
                governor::gate_group_cardinality(&distinct_counts, limits::MAX_GROUP_BY_ROWS)
            {
                info!(
                    dataset_id,
                    distinct_count = warning.distinct_count,
                    "cardinality gate triggered"
                );
                return Ok(QueryOutcome::NeedsConfirmation(warning));
            }
        }

        let mut select_parts = Vec::new();
        let mut group_exprs = Vec::new();
        for column in group_by {
            let quoted = sanitize_identifier(column)?;
            select_parts.push(quoted.clone());
            group_exprs.push(quoted);
        }
        if let Some(bucket) = time_bucket {
            let expr = bucket.grain.truncate(&bucket.column)?;
            let alias =
                sanitize_identifier(&format!("{}_{}", bucket.column, bucket.grain.as_sql()))?;
            select_parts.push(format!("{expr} AS {alias}"));
            group_exprs.push(expr);
        }
        for aggregation in aggregations {
            let column_type = aggregation
                .column
                .as_deref()
                .and_then(|c| table.column_type(c));
            select_parts.push(aggregation.to_select_part(column_type)?);
        }

        let mut params = Vec::new();
        let mut where_clauses = Vec::new();
        for filter in filters {
            let column_type = table.column_type(&filter.column);
            let (clause, param) =
                governor::filter_clause(filter, column_type, params.len() + 1)?;
            where_clauses.push(clause);
            params.push(param);
        }

        let quoted_table = sanitize_identifier(&table.table_name)?;
        let mut sql = format!(
            "SELECT {} FROM {quoted_table}",
            select_parts.join(", ")
        );
        if !where_clauses.is_empty() {
            sql.push_str(&format!(" WHERE {}", where_clauses.join(" AND ")));
        }
        if !group_exprs.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_exprs.join(", ")));
        }
        if let Some(order) = order_by {
            let clause = governor::validate_order_by(order, group_by, aggregations)?;
            sql.push_str(&format!(" ORDER BY {clause}"));
        }
        let limit = enforce_limit(
            limit.unwrap_or(limits::MAX_GROUP_BY_ROWS),
            limits::MAX_GROUP_BY_ROWS,
        );
        sql.push_str(&format!(" LIMIT {limit}"));

        let data = self
            .execute_cached(dataset_id, &sql, &params, QueryClass::Aggregation)
            .await?;
        Ok(QueryOutcome::Rows(data))
    }

    // ------------------------------------------------------------------
    // filter_data
    // ------------------------------------------------------------------

    /// Row-level filtering with column projection and pagination.
    pub async fn filter_data(
        &self,
        dataset_id: i64,
        filters: &[FilterSpec],
        columns: &[String],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ExecResult<QueryOutcome> {
        let mut referenced: Vec<String> = filters.iter().map(|f| f.column.clone()).collect();
        referenced.extend(columns.iter().cloned());
        let table = self.catalog.resolve_checked(dataset_id, &referenced).await?;

        // Empty projection means every data column, minus the bookkeeping
        // columns the import layer adds.
        let projected: Vec<&String> = if columns.is_empty() {
            table
                .columns
                .iter()
                .filter(|c| !catalog::RESERVED_COLUMNS.contains(&c.as_str()))
                .collect()
        } else {
            columns.iter().collect()
        };
        if projected.is_empty() {
            return Err(ExecError::InvalidArgument {
                message: "no columns left to select".to_string(),
            });
        }
        let select_list = projected
            .iter()
            .map(|c| sanitize_identifier(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let mut params = Vec::new();
        let mut where_clauses = Vec::new();
        for filter in filters {
            let column_type = table.column_type(&filter.column);
            let (clause, param) =
                governor::filter_clause(filter, column_type, params.len() + 1)?;
            where_clauses.push(clause);
            params.push(param);
        }

        let quoted_table = sanitize_identifier(&table.table_name)?;
        let mut sql = format!("SELECT {select_list} FROM {quoted_table}");
        if !where_clauses.is_empty() {
            sql.push_str(&format!(" WHERE {}", where_clauses.join(" AND ")));
        }
        let limit = enforce_limit(
            limit.unwrap_or(limits::MAX_FILTER_ROWS),
            limits::MAX_FILTER_ROWS,
        );
        sql.push_str(&format!(" LIMIT {limit}"));
        let offset = offset.unwrap_or(0).max(0);
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let data = self
            .execute_cached(dataset_id, &sql, &params, QueryClass::Filter)
            .await?;
        Ok(QueryOutcome::Rows(data))
    }

    // ------------------------------------------------------------------
    // compare_periods
    // ------------------------------------------------------------------

    /// Run the same metric over two date ranges and report the delta. The
    /// date bounds are injected as structured filters on the validated
    /// metric, never spliced into the DSL text.
    pub async fn compare_periods(
        &self,
        dataset_id: i64,
        dsl: &str,
        date_column: &str,
        period1: DateRange,
        period2: DateRange,
    ) -> ExecResult<QueryOutcome> {
        let metric = validate_metric(dsl);
        if metric.group_by.as_ref().is_some_and(|g| !g.is_empty()) {
            return Err(ExecError::InvalidArgument {
                message: "compare_periods does not support GROUP BY metrics".to_string(),
            });
        }
        if period1.overlaps(&period2) {
            warn!(dataset_id, "comparison periods overlap");
        }

        let mut referenced = metric.referenced_columns.clone();
        referenced.push(date_column.to_string());
        let table = self.catalog.resolve_checked(dataset_id, &referenced).await?;

        let started = Instant::now();
        let compiled1 = crate::dsl::translate(
            &bound_to_period(&metric, date_column, period1),
            &table.table_name,
        )?;
        let compiled2 = crate::dsl::translate(
            &bound_to_period(&metric, date_column, period2),
            &table.table_name,
        )?;
        let (data1, data2) = futures::try_join!(
            self.execute_cached(
                dataset_id,
                &compiled1.sql,
                &compiled1.parameters,
                QueryClass::Comparison,
            ),
            self.execute_cached(
                dataset_id,
                &compiled2.sql,
                &compiled2.parameters,
                QueryClass::Comparison,
            ),
        )?;
        let (value1, value2) = (scalar_result(&data1.rows), scalar_result(&data2.rows));

        let delta = value2 - value1;
        let percent_change = if value1 != 0.0 {
            Some((delta / value1 * 10_000.0).round() / 100.0)
        } else {
            None
        };
        let rows = json!([{
            "period1": { "start": period1.start, "end": period1.end, "value": value1 },
            "period2": { "start": period2.start, "end": period2.end, "value": value2 },
            "delta": delta,
            "percentChange": percent_change,
        }]);
        Ok(QueryOutcome::Rows(QueryData {
            rows,
            row_count: 1,
            execution_time_ms: started.elapsed().as_millis() as u64,
            cached: false,
        }))
    }

    // ------------------------------------------------------------------
    // get_schema
    // ------------------------------------------------------------------

    /// Describe the dataset's columns and the metric templates available.
    /// Touches the catalog only, never user data.
    pub async fn get_schema(&self, dataset_id: i64) -> ExecResult<QueryOutcome> {
        let started = Instant::now();
        let table = self.catalog.resolve(dataset_id).await?;
        let columns: Vec<Value> = table
            .columns
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "dataType": table.column_type(name),
                })
            })
            .collect();
        let templates: Vec<Value> = metrics::TEMPLATES
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "displayName": t.display_name,
                    "unit": t.unit,
                    "isPrimary": t.is_primary,
                })
            })
            .collect();
        let rows = json!([{
            "tableName": table.table_name,
            "rowCount": table.row_count,
            "columns": columns,
            "metricTemplates": templates,
        }]);
        Ok(QueryOutcome::Rows(QueryData {
            rows,
            row_count: 1,
            execution_time_ms: started.elapsed().as_millis() as u64,
            cached: false,
        }))
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// `COUNT(DISTINCT col)` probe for the cardinality gate.
    async fn probe_distinct(&self, table_name: &str, column: &str) -> ExecResult<i64> {
        let quoted_table = sanitize_identifier(table_name)?;
        let quoted = sanitize_identifier(column)?;
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(&timeout_statement()).await?;
        let row = tx
            .query_one(
                &format!("SELECT COUNT(DISTINCT {quoted}) FROM {quoted_table}"),
                &[],
            )
            .await?;
        tx.commit().await?;
        Ok(row.get(0))
    }

    /// Run one statement inside a transaction with a local statement
    /// timeout. Results come back as a JSON array built by Postgres, so
    /// NUMERIC, date and text columns all serialize without a type map on
    /// this side.
    async fn execute_statement(&self, sql: &str, params: &[SqlParam]) -> ExecResult<QueryData> {
        let started = Instant::now();
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(&timeout_statement()).await?;

        let wrapped =
            format!("SELECT COALESCE(json_agg(row_to_json(t)), '[]'::json) FROM ({sql}) AS t");
        let binds = bind_params(params);
        let row = tx.query_one(&wrapped, &binds).await?;
        tx.commit().await?;

        let rows: Value = row.get(0);
        let row_count = rows.as_array().map(Vec::len).unwrap_or(0);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(sql, row_count, elapsed_ms, "statement executed");
        Ok(QueryData {
            rows,
            row_count,
            execution_time_ms: elapsed_ms,
            cached: false,
        })
    }

    /// Single-flight wrapper: serve from the cache when possible, otherwise
    /// either compute-and-publish or wait for whoever is already computing.
    async fn execute_cached(
        &self,
        dataset_id: i64,
        sql: &str,
        params: &[SqlParam],
        class: QueryClass,
    ) -> ExecResult<QueryData> {
        let Some(cache) = &self.cache else {
            return self.execute_statement(sql, params).await;
        };
        let started = Instant::now();
        let query_hash = compute_query_hash(sql, params);

        if let Some(entry) = cache.get_cached(dataset_id, &query_hash).await? {
            if let Some(rows) = entry.result_json {
                debug!(dataset_id, query_hash, "cache hit");
                return Ok(QueryData::from_cached(
                    rows,
                    started.elapsed().as_millis() as u64,
                ));
            }
        }

        if cache.acquire_lock(dataset_id, &query_hash).await? {
            match self.execute_statement(sql, params).await {
                Ok(data) => {
                    cache
                        .cache_result(dataset_id, &query_hash, &data.rows, class)
                        .await?;
                    Ok(data)
                }
                Err(err) => {
                    cache
                        .cache_error(dataset_id, &query_hash, &err.to_string())
                        .await?;
                    Err(err)
                }
            }
        } else {
            let entry = cache.wait_for_result(dataset_id, &query_hash).await?;
            if entry.status == CacheStatus::Ready {
                let rows = entry.result_json.unwrap_or_else(|| Value::Array(Vec::new()));
                Ok(QueryData::from_cached(
                    rows,
                    started.elapsed().as_millis() as u64,
                ))
            } else {
                Err(ExecError::QueryFailed {
                    message: entry
                        .error_message
                        .unwrap_or_else(|| "cached computation failed".to_string()),
                })
            }
        }
    }
}

fn timeout_statement() -> String {
    format!(
        "SET LOCAL statement_timeout = {}",
        limits::STATEMENT_TIMEOUT_MS
    )
}

fn bind_params(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| match p {
            SqlParam::Number(v) => v as &(dyn ToSql + Sync),
            SqlParam::Text(v) => v as &(dyn ToSql + Sync),
        })
        .collect()
}

/// Clone a metric with inclusive date bounds appended as filters.
fn bound_to_period(
    metric: &ValidatedMetric,
    date_column: &str,
    range: DateRange,
) -> ValidatedMetric {
    let mut bounded = metric.clone();
    bounded.filters.push(FilterCondition {
        column: date_column.to_string(),
        operator: ComparisonOp::Gte,
        value: FilterValue::Text(range.start.to_string()),
    });
    bounded.filters.push(FilterCondition {
        column: date_column.to_string(),
        operator: ComparisonOp::Lte,
        value: FilterValue::Text(range.end.to_string()),
    });
    bounded
}

/// Pull the single `result` value out of a metric query's row set. A query
/// over zero matching rows yields SQL NULL, which reads as zero here.
fn scalar_result(rows: &Value) -> f64 {
    rows.as_array()
        .and_then(|a| a.first())
        .and_then(|row| row.get("result"))
        .and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0.0)
}
