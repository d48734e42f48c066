//! Metric expression language.
//!
//! Non-technical operators define reusable KPIs ("total revenue per
//! category") as small expressions instead of raw SQL:
//!
//! ```text
//! SUM(importo) WHERE categoria = "cibo" GROUP BY categoria
//! SUM(prezzo) * SUM(qta)
//! COUNT(DISTINCT cliente_id)
//! ```
//!
//! The pipeline is tokenize → parse → schema-check → translate:
//!
//! ```text
//!   source ──> token::tokenize ──> parser::parse ──> ValidatedMetric
//!                                                        │
//!                         validate_against_schema ◄──────┤
//!                                                        ▼
//!                                sql::translate ──> MetricSql {sql, $params}
//! ```
//!
//! Every stage accumulates errors rather than bailing on the first one, and
//! nothing user-written is ever interpolated into SQL text: identifiers are
//! sanitized, values become bind parameters.

pub mod ast;
pub mod parser;
pub mod sql;
pub mod token;

pub use ast::{
    AggregateFn, BinaryOp, ColumnArg, ComparisonOp, FilterCondition, FilterValue, MetricExpr,
};
pub use sql::{compute_query_hash, sanitize_identifier, translate, MetricSql, SqlParam};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum DslError {
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("invalid comparison operator '{text}' at position {position}")]
    InvalidComparison { text: String, position: usize },

    #[error("unterminated string starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },

    #[error("expected {expected} but found {found} at position {position}")]
    UnexpectedToken {
        expected: String,
        found: String,
        position: usize,
    },

    #[error("expected {expected} but the expression ended")]
    UnexpectedEnd { expected: String },

    #[error("unexpected trailing input at position {position}")]
    TrailingInput { position: usize },

    #[error("invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("invalid metric: {errors}")]
    InvalidMetric { errors: String },
}

pub type DslResult<T> = Result<T, DslError>;

// ============================================================================
// Validated metric
// ============================================================================

/// Outcome of parsing a metric expression. Always produced, even for
/// garbage input; check `is_valid` before translating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedMetric {
    pub expression: MetricExpr,
    pub filters: Vec<FilterCondition>,
    pub group_by: Option<Vec<String>>,
    /// Every column the expression, filters, and grouping touch, sorted.
    pub referenced_columns: Vec<String>,
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidatedMetric {
    /// The placeholder result of a failed parse.
    pub fn invalid(errors: Vec<String>) -> ValidatedMetric {
        ValidatedMetric {
            expression: MetricExpr::zero(),
            filters: Vec::new(),
            group_by: None,
            referenced_columns: Vec::new(),
            is_valid: false,
            errors,
        }
    }

    /// Check every referenced column against the table schema,
    /// case-insensitively. Returns the offenders.
    pub fn validate_against_schema(&self, table_columns: &[String]) -> Vec<String> {
        let schema: Vec<String> = table_columns.iter().map(|c| c.to_lowercase()).collect();
        self.referenced_columns
            .iter()
            .filter(|c| !schema.contains(&c.to_lowercase()))
            .cloned()
            .collect()
    }
}

/// Parse and validate a metric expression. Never panics; malformed input
/// comes back as an invalid metric carrying every parse error found.
pub fn validate_metric(source: &str) -> ValidatedMetric {
    parser::parse(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_check_is_case_insensitive() {
        let metric = validate_metric("SUM(Importo) WHERE Categoria = 'cibo'");
        assert!(metric.is_valid);
        let schema = vec!["importo".to_string(), "categoria".to_string()];
        assert!(metric.validate_against_schema(&schema).is_empty());
    }

    #[test]
    fn unknown_columns_are_reported_by_name() {
        let metric = validate_metric("SUM(ricavo)");
        let schema = vec!["importo".to_string()];
        assert_eq!(
            metric.validate_against_schema(&schema),
            vec!["ricavo".to_string()]
        );
    }

    #[test]
    fn empty_input_is_invalid_not_a_panic() {
        let metric = validate_metric("   ");
        assert!(!metric.is_valid);
        assert_eq!(metric.errors.len(), 1);
    }
}
