//! AST types for the metric expression language.
//!
//! The grammar is deliberately small: arithmetic over aggregate calls and
//! numeric literals, an optional `WHERE` with AND-joined equality/range
//! conditions, and an optional `GROUP BY` column list. Anything fancier is
//! the executor's job, not the metric author's.

use serde::{Deserialize, Serialize};

// ============================================================================
// Operators and functions
// ============================================================================

/// Aggregate functions a metric may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateFn {
    Sum,
    Avg,
    Count,
    /// `COUNT(DISTINCT col)`, produced by the parser, never written directly.
    CountDistinct,
    Min,
    Max,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Count => "COUNT",
            AggregateFn::CountDistinct => "COUNT_DISTINCT",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
}

impl ComparisonOp {
    pub fn parse(text: &str) -> Option<ComparisonOp> {
        match text {
            "=" => Some(ComparisonOp::Eq),
            "!=" => Some(ComparisonOp::Neq),
            ">" => Some(ComparisonOp::Gt),
            "<" => Some(ComparisonOp::Lt),
            ">=" => Some(ComparisonOp::Gte),
            "<=" => Some(ComparisonOp::Lte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "!=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Lte => "<=",
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Argument of an aggregate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnArg {
    /// `COUNT(*)`.
    Star,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetricExpr {
    Literal {
        value: f64,
    },
    Aggregate {
        function: AggregateFn,
        column: ColumnArg,
    },
    Binary {
        operator: BinaryOp,
        left: Box<MetricExpr>,
        right: Box<MetricExpr>,
    },
}

impl MetricExpr {
    /// A zero literal, the placeholder expression of a failed parse.
    pub fn zero() -> MetricExpr {
        MetricExpr::Literal { value: 0.0 }
    }
}

// ============================================================================
// Clauses
// ============================================================================

/// Comparison value in a `WHERE` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

/// One AND-joined `WHERE` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub column: String,
    pub operator: ComparisonOp,
    pub value: FilterValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_round_trip() {
        for text in ["=", "!=", ">", "<", ">=", "<="] {
            let op = ComparisonOp::parse(text).unwrap();
            assert_eq!(op.as_str(), text);
        }
        assert!(ComparisonOp::parse("<>").is_none());
    }

    #[test]
    fn expression_serializes_tagged() {
        let expr = MetricExpr::Aggregate {
            function: AggregateFn::Sum,
            column: ColumnArg::Named("importo".to_string()),
        };
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["type"], "aggregate");
        assert_eq!(json["function"], "SUM");
    }
}
