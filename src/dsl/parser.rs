//! Recursive descent parser for metric expressions.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! metric      := additive clauses?
//! additive    := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := primary (("*" | "/") primary)*
//! primary     := "(" additive ")" | NUMBER | aggregate
//! aggregate   := FUNCTION "(" "DISTINCT"? (IDENTIFIER | "*") ")"
//! clauses     := ("WHERE" condition ("AND" condition)*)? ("GROUP" "BY" IDENTIFIER ("," IDENTIFIER)*)?
//! ```
//!
//! Parsing never panics and never returns `Err`: a malformed input yields a
//! [`ValidatedMetric`] with `is_valid == false` and the failure messages
//! accumulated, so callers can surface every problem to the metric author in
//! one round trip.

use std::collections::BTreeSet;

use crate::dsl::ast::{
    AggregateFn, BinaryOp, ColumnArg, ComparisonOp, FilterCondition, FilterValue, MetricExpr,
};
use crate::dsl::token::{tokenize, SpannedToken, Token};
use crate::dsl::{DslError, ValidatedMetric};

/// Parse a metric expression, accumulating errors instead of failing fast.
pub fn parse(source: &str) -> ValidatedMetric {
    if source.trim().is_empty() {
        return ValidatedMetric::invalid(vec!["metric expression is required".to_string()]);
    }
    let tokens = match tokenize(source) {
        Ok(tokens) => tokens,
        Err(err) => return ValidatedMetric::invalid(vec![err.to_string()]),
    };
    Parser::new(tokens).run()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
    referenced: BTreeSet<String>,
    errors: Vec<String>,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            position: 0,
            referenced: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> ValidatedMetric {
        let parsed = self.parse_metric();
        match parsed {
            Ok((expression, filters, group_by)) => {
                if self.position < self.tokens.len() {
                    let t = &self.tokens[self.position];
                    self.errors.push(
                        DslError::TrailingInput {
                            position: t.position,
                        }
                        .to_string(),
                    );
                }
                let is_valid = self.errors.is_empty();
                ValidatedMetric {
                    expression,
                    filters,
                    group_by,
                    referenced_columns: self.referenced.into_iter().collect(),
                    is_valid,
                    errors: self.errors,
                }
            }
            Err(err) => {
                self.errors.push(err.to_string());
                ValidatedMetric::invalid(self.errors)
            }
        }
    }

    fn parse_metric(
        &mut self,
    ) -> Result<(MetricExpr, Vec<FilterCondition>, Option<Vec<String>>), DslError> {
        let expression = self.parse_additive()?;
        let mut filters = Vec::new();
        let mut group_by = None;
        loop {
            match self.current() {
                Some(Token::Where) => {
                    self.advance();
                    filters.extend(self.parse_filters()?);
                }
                Some(Token::Group) => {
                    self.advance();
                    self.expect_by()?;
                    group_by = Some(self.parse_group_by()?);
                }
                _ => break,
            }
        }
        Ok((expression, filters, group_by))
    }

    // ------------------------------------------------------------------
    // Expression levels
    // ------------------------------------------------------------------

    fn parse_additive(&mut self) -> Result<MetricExpr, DslError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub))) = self.current() {
            let operator = *op;
            self.advance();
            let right = self.parse_multiplicative()?;
            left = MetricExpr::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<MetricExpr, DslError> {
        let mut left = self.parse_primary()?;
        while let Some(Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div))) = self.current() {
            let operator = *op;
            self.advance();
            let right = self.parse_primary()?;
            left = MetricExpr::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<MetricExpr, DslError> {
        match self.current() {
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_additive()?;
                match self.current() {
                    Some(Token::RParen) => {
                        self.advance();
                        Ok(expr)
                    }
                    _ => Err(self.unexpected("closing parenthesis")),
                }
            }
            Some(Token::Number(value)) => {
                let value = *value;
                self.advance();
                Ok(MetricExpr::Literal { value })
            }
            Some(Token::Function(_)) => self.parse_aggregate(),
            _ => Err(self.unexpected("aggregate call, number, or parenthesized expression")),
        }
    }

    fn parse_aggregate(&mut self) -> Result<MetricExpr, DslError> {
        let function = match self.current() {
            Some(Token::Function(f)) => *f,
            _ => return Err(self.unexpected("aggregate function")),
        };
        self.advance();
        match self.current() {
            Some(Token::LParen) => self.advance(),
            _ => return Err(self.unexpected("opening parenthesis after aggregate name")),
        }

        let mut distinct = false;
        if matches!(self.current(), Some(Token::Distinct)) {
            distinct = true;
            self.advance();
        }

        let column = match self.current() {
            Some(Token::Star) => {
                self.advance();
                ColumnArg::Star
            }
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                self.referenced.insert(name.clone());
                ColumnArg::Named(name)
            }
            _ => return Err(self.unexpected("column name or *")),
        };

        match self.current() {
            Some(Token::RParen) => self.advance(),
            _ => return Err(self.unexpected("closing parenthesis after aggregate argument")),
        }

        let function = if distinct && function == AggregateFn::Count {
            AggregateFn::CountDistinct
        } else {
            function
        };
        Ok(MetricExpr::Aggregate { function, column })
    }

    // ------------------------------------------------------------------
    // Clauses
    // ------------------------------------------------------------------

    fn parse_filters(&mut self) -> Result<Vec<FilterCondition>, DslError> {
        let mut filters = Vec::new();
        loop {
            // WHERE and each AND must be followed by a condition.
            let column = match self.current() {
                Some(Token::Identifier(name)) => name.clone(),
                _ => return Err(self.unexpected("filter column")),
            };
            self.advance();
            self.referenced.insert(column.clone());

            let operator = match self.current() {
                Some(Token::Comparison(op)) => *op,
                _ => return Err(self.unexpected("comparison operator")),
            };
            self.advance();

            let value = match self.current() {
                Some(Token::Str(s)) => FilterValue::Text(s.clone()),
                Some(Token::Number(n)) => FilterValue::Number(*n),
                _ => return Err(self.unexpected("filter value")),
            };
            self.advance();

            filters.push(FilterCondition {
                column,
                operator,
                value,
            });

            if matches!(self.current(), Some(Token::And)) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(filters)
    }

    fn parse_group_by(&mut self) -> Result<Vec<String>, DslError> {
        let mut columns = Vec::new();
        loop {
            // GROUP BY and each comma must be followed by a column.
            match self.current() {
                Some(Token::Identifier(name)) => {
                    let name = name.clone();
                    self.advance();
                    self.referenced.insert(name.clone());
                    columns.push(name);
                }
                _ => return Err(self.unexpected("group by column")),
            }
            if matches!(self.current(), Some(Token::Comma)) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(columns)
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|t| &t.token)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expect_by(&mut self) -> Result<(), DslError> {
        match self.current() {
            Some(Token::By) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.unexpected("BY after GROUP")),
        }
    }

    fn unexpected(&self, expected: &str) -> DslError {
        match self.tokens.get(self.position) {
            Some(t) => DslError::UnexpectedToken {
                expected: expected.to_string(),
                found: format!("{:?}", t.token),
                position: t.position,
            },
            None => DslError::UnexpectedEnd {
                expected: expected.to_string(),
            },
        }
    }
}

/// Accepted comparison operators, re-exported for callers building filters
/// programmatically.
pub fn comparison_ops() -> &'static [ComparisonOp] {
    &[
        ComparisonOp::Eq,
        ComparisonOp::Neq,
        ComparisonOp::Gt,
        ComparisonOp::Lt,
        ComparisonOp::Gte,
        ComparisonOp::Lte,
    ]
}
