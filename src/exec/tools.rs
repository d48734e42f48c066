//! Wire contract for the external planner's tool calls.
//!
//! The planner speaks named calls with fixed argument schemas. Every
//! argument is validated downstream against the live dataset schema and
//! rejected when invalid; nothing is auto-corrected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::exec::governor::{Aggregation, DateGrain, FilterSpec, OrderBy};

/// An inclusive date range for period comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Optional time truncation for grouped aggregations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBucket {
    pub column: String,
    pub grain: DateGrain,
}

/// One planner call. Unknown tool names or malformed argument shapes fail
/// deserialization and surface as a structured error to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    QueryMetric {
        dataset_id: i64,
        dsl: String,
    },
    AggregateGroup {
        dataset_id: i64,
        group_by: Vec<String>,
        aggregations: Vec<Aggregation>,
        #[serde(default)]
        filters: Vec<FilterSpec>,
        #[serde(default)]
        order_by: Option<OrderBy>,
        #[serde(default)]
        time_bucket: Option<TimeBucket>,
        #[serde(default)]
        limit: Option<i64>,
        /// Set after the caller has answered a cardinality warning.
        #[serde(default)]
        confirmed: bool,
    },
    FilterData {
        dataset_id: i64,
        filters: Vec<FilterSpec>,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        limit: Option<i64>,
        #[serde(default)]
        offset: Option<i64>,
    },
    ComparePeriods {
        dataset_id: i64,
        dsl: String,
        date_column: String,
        period1: DateRange,
        period2: DateRange,
    },
    GetSchema {
        dataset_id: i64,
    },
}

impl ToolCall {
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolCall::QueryMetric { .. } => "query_metric",
            ToolCall::AggregateGroup { .. } => "aggregate_group",
            ToolCall::FilterData { .. } => "filter_data",
            ToolCall::ComparePeriods { .. } => "compare_periods",
            ToolCall::GetSchema { .. } => "get_schema",
        }
    }

    pub fn dataset_id(&self) -> i64 {
        match self {
            ToolCall::QueryMetric { dataset_id, .. }
            | ToolCall::AggregateGroup { dataset_id, .. }
            | ToolCall::FilterData { dataset_id, .. }
            | ToolCall::ComparePeriods { dataset_id, .. }
            | ToolCall::GetSchema { dataset_id } => *dataset_id,
        }
    }
}
