//! Named business metric templates.
//!
//! Templates are written against logical roles (`{revenue_amount}`,
//! `{quantity}`, …), never physical column names, so one definition of
//! "Fatturato" works for every dataset once its mappings are confirmed.
//! Each template also declares the range rules and warning thresholds the
//! result validator enforces on its values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dsl::sanitize_identifier;
use crate::exec::{ExecError, ExecResult};
use crate::model::LogicalRole;

// ============================================================================
// Range rules
// ============================================================================

/// Hard and soft bounds on a metric value. Hard violations block the
/// answer; the warning threshold only annotates it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRules {
    pub must_be_positive: bool,
    pub must_be_integer: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub warning_threshold: Option<f64>,
    pub warning_message: Option<&'static str>,
}

impl RangeRules {
    /// Hard rule violations for a computed value.
    pub fn hard_violations(&self, value: f64) -> Vec<String> {
        let mut violations = Vec::new();
        if self.must_be_positive && value < 0.0 {
            violations.push(format!("value {value} must be positive"));
        }
        if self.must_be_integer && value.fract() != 0.0 {
            violations.push(format!("value {value} must be an integer"));
        }
        if let Some(min) = self.min_value {
            if value < min {
                violations.push(format!("value {value} below minimum {min}"));
            }
        }
        if let Some(max) = self.max_value {
            if value > max {
                violations.push(format!("value {value} above maximum {max}"));
            }
        }
        violations
    }

    /// Soft warning, never blocking.
    pub fn warning(&self, value: f64) -> Option<String> {
        let threshold = self.warning_threshold?;
        if value > threshold {
            Some(
                self.warning_message
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("value {value} above warning threshold {threshold}")),
            )
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Currency,
    Percentage,
    Number,
    Count,
}

// ============================================================================
// Templates
// ============================================================================

/// A reusable metric defined over logical roles.
#[derive(Debug, Clone)]
pub struct MetricTemplate {
    pub name: &'static str,
    pub display_name: &'static str,
    /// SQL aggregation with `{role}` placeholders.
    pub sql_template: &'static str,
    pub required_roles: &'static [LogicalRole],
    pub unit: MetricUnit,
    pub rules: RangeRules,
    /// Primary metrics are surfaced to planners by default.
    pub is_primary: bool,
}

const POSITIVE: RangeRules = RangeRules {
    must_be_positive: true,
    must_be_integer: false,
    min_value: Some(0.0),
    max_value: None,
    warning_threshold: None,
    warning_message: None,
};

const POSITIVE_INT: RangeRules = RangeRules {
    must_be_positive: true,
    must_be_integer: true,
    min_value: Some(0.0),
    max_value: None,
    warning_threshold: None,
    warning_message: None,
};

const PERCENT: RangeRules = RangeRules {
    must_be_positive: false,
    must_be_integer: false,
    min_value: Some(0.0),
    max_value: Some(100.0),
    warning_threshold: None,
    warning_message: None,
};

pub static TEMPLATES: &[MetricTemplate] = &[
    MetricTemplate {
        name: "revenue",
        display_name: "Fatturato",
        sql_template: "SUM(CAST({revenue_amount} AS NUMERIC))",
        required_roles: &[LogicalRole::RevenueAmount],
        unit: MetricUnit::Currency,
        rules: POSITIVE,
        is_primary: true,
    },
    MetricTemplate {
        name: "revenue_gross",
        display_name: "Fatturato Lordo",
        sql_template: "SUM(CAST({price} AS NUMERIC) * CAST({quantity} AS NUMERIC))",
        required_roles: &[LogicalRole::Price, LogicalRole::Quantity],
        unit: MetricUnit::Currency,
        rules: POSITIVE,
        is_primary: true,
    },
    MetricTemplate {
        name: "document_count",
        display_name: "Numero Documenti",
        sql_template: "COUNT(DISTINCT {document_id})",
        required_roles: &[LogicalRole::DocumentId],
        unit: MetricUnit::Count,
        rules: POSITIVE_INT,
        is_primary: true,
    },
    MetricTemplate {
        name: "ticket_medio",
        display_name: "Ticket Medio",
        sql_template:
            "SUM(CAST({revenue_amount} AS NUMERIC)) / NULLIF(COUNT(DISTINCT {document_id}), 0)",
        required_roles: &[LogicalRole::RevenueAmount, LogicalRole::DocumentId],
        unit: MetricUnit::Currency,
        rules: POSITIVE,
        is_primary: true,
    },
    MetricTemplate {
        name: "food_cost_percent",
        display_name: "Food Cost %",
        sql_template: "(SUM(CAST({cost} AS NUMERIC) * CAST({quantity} AS NUMERIC)) / NULLIF(SUM(CAST({price} AS NUMERIC) * CAST({quantity} AS NUMERIC)), 0)) * 100",
        required_roles: &[LogicalRole::Cost, LogicalRole::Price, LogicalRole::Quantity],
        unit: MetricUnit::Percentage,
        rules: RangeRules {
            must_be_positive: false,
            must_be_integer: false,
            min_value: Some(0.0),
            max_value: Some(100.0),
            warning_threshold: Some(35.0),
            warning_message: Some("food cost above 35% of gross revenue, check margins"),
        },
        is_primary: true,
    },
    MetricTemplate {
        name: "gross_margin",
        display_name: "Margine Lordo",
        sql_template:
            "SUM((CAST({price} AS NUMERIC) - CAST({cost} AS NUMERIC)) * CAST({quantity} AS NUMERIC))",
        required_roles: &[LogicalRole::Price, LogicalRole::Cost, LogicalRole::Quantity],
        unit: MetricUnit::Currency,
        rules: RangeRules {
            must_be_positive: false,
            must_be_integer: false,
            min_value: None,
            max_value: None,
            warning_threshold: None,
            warning_message: None,
        },
        is_primary: true,
    },
    MetricTemplate {
        name: "gross_margin_percent",
        display_name: "Margine Lordo %",
        sql_template: "(SUM((CAST({price} AS NUMERIC) - CAST({cost} AS NUMERIC)) * CAST({quantity} AS NUMERIC)) / NULLIF(SUM(CAST({price} AS NUMERIC) * CAST({quantity} AS NUMERIC)), 0)) * 100",
        required_roles: &[LogicalRole::Price, LogicalRole::Cost, LogicalRole::Quantity],
        unit: MetricUnit::Percentage,
        rules: PERCENT,
        is_primary: false,
    },
    MetricTemplate {
        name: "avg_unit_price",
        display_name: "Prezzo Medio Unitario",
        sql_template: "AVG(CAST({price} AS NUMERIC))",
        required_roles: &[LogicalRole::Price],
        unit: MetricUnit::Currency,
        rules: POSITIVE,
        is_primary: false,
    },
    MetricTemplate {
        name: "avg_unit_price_weighted",
        display_name: "Prezzo Medio Ponderato",
        sql_template: "SUM(CAST({price} AS NUMERIC) * CAST({quantity} AS NUMERIC)) / NULLIF(SUM(CAST({quantity} AS NUMERIC)), 0)",
        required_roles: &[LogicalRole::Price, LogicalRole::Quantity],
        unit: MetricUnit::Currency,
        rules: POSITIVE,
        is_primary: true,
    },
    MetricTemplate {
        name: "avg_quantity_per_line",
        display_name: "Media Quantità per Riga",
        sql_template: "AVG(CAST({quantity} AS NUMERIC))",
        required_roles: &[LogicalRole::Quantity],
        unit: MetricUnit::Number,
        rules: POSITIVE,
        is_primary: false,
    },
    MetricTemplate {
        name: "avg_items_per_document",
        display_name: "Media Articoli per Documento",
        sql_template: "COUNT(*) / NULLIF(COUNT(DISTINCT {document_id}), 0)",
        required_roles: &[LogicalRole::DocumentId],
        unit: MetricUnit::Number,
        rules: POSITIVE,
        is_primary: false,
    },
    MetricTemplate {
        name: "lines_count",
        display_name: "Conteggio Righe",
        sql_template: "COUNT(*)",
        required_roles: &[],
        unit: MetricUnit::Count,
        rules: POSITIVE_INT,
        is_primary: false,
    },
];

pub fn template(name: &str) -> Option<&'static MetricTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// Templates that become computable once this role is mapped.
pub fn templates_for_role(role: LogicalRole) -> Vec<&'static str> {
    TEMPLATES
        .iter()
        .filter(|t| t.required_roles.contains(&role))
        .map(|t| t.name)
        .collect()
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern"));

impl MetricTemplate {
    /// Substitute confirmed (role → physical column) bindings into the
    /// template. A missing binding is an error, not a guess.
    pub fn resolve(&self, bindings: &[(LogicalRole, String)]) -> ExecResult<String> {
        let mut result = String::with_capacity(self.sql_template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(self.sql_template) {
            let whole = caps.get(0).expect("capture 0");
            let role_name = &caps[1];
            let role =
                LogicalRole::parse(role_name).ok_or_else(|| ExecError::InvalidArgument {
                    message: format!("template '{}' names unknown role '{role_name}'", self.name),
                })?;
            let column = bindings
                .iter()
                .find(|(r, _)| *r == role)
                .map(|(_, c)| c.as_str())
                .ok_or(ExecError::MissingRole { role })?;
            result.push_str(&self.sql_template[last..whole.start()]);
            result.push_str(&sanitize_identifier(column)?);
            last = whole.end();
        }
        result.push_str(&self.sql_template[last..]);
        Ok(result)
    }
}
