//! Role detection over physical columns.
//!
//! Two independent detectors feed the proposal pipeline: the name detector
//! (regex registry in [`crate::model::roles`], plus per-dataset custom
//! rules) and the data detector (value shapes and column statistics). When
//! both agree the proposal gets a confidence boost; when they disagree the
//! data detector wins and a warning records the conflict.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::thresholds;
use crate::model::roles::{auto_detect_role, detect_confidence};
use crate::model::LogicalRole;

// ============================================================================
// Custom rules
// ============================================================================

/// How a custom rule matches a column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatch {
    Exact,
    Contains,
    StartsWith,
    EndsWith,
}

/// A consultant-defined detection rule for one dataset. Custom rules are
/// checked before the built-in registry and always win when they match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRule {
    pub match_type: RuleMatch,
    pub pattern: String,
    pub role: LogicalRole,
    /// Lower number = checked first.
    pub priority: i32,
}

impl CustomRule {
    fn matches(&self, name_lower: &str) -> bool {
        let pat = self.pattern.to_lowercase();
        match self.match_type {
            RuleMatch::Exact => name_lower == pat,
            RuleMatch::Contains => name_lower.contains(&pat),
            RuleMatch::StartsWith => name_lower.starts_with(&pat),
            RuleMatch::EndsWith => name_lower.ends_with(&pat),
        }
    }
}

/// Confidence granted to a custom rule hit.
pub const CUSTOM_RULE_CONFIDENCE: f64 = 0.98;

// ============================================================================
// Name-driven batch detection
// ============================================================================

/// A proposed (column, role) binding with its detection confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleProposal {
    pub physical_column: String,
    pub role: LogicalRole,
    pub confidence: f64,
}

/// Detect roles for a whole column list by name.
///
/// Each role is claimed at most once: when several columns match the same
/// role, the highest-confidence column keeps it and the rest stay unmapped.
/// Proposals below [`thresholds::DETECT_FLOOR`] are dropped.
pub fn auto_detect_all_columns(
    physical_columns: &[String],
    custom_rules: &[CustomRule],
) -> Vec<RoleProposal> {
    let mut rules: Vec<&CustomRule> = custom_rules.iter().collect();
    rules.sort_by_key(|r| r.priority);

    let mut detections: Vec<RoleProposal> = Vec::new();
    for column in physical_columns {
        let lower = column.to_lowercase();
        let hit = rules
            .iter()
            .find(|r| r.matches(&lower))
            .map(|r| (r.role, CUSTOM_RULE_CONFIDENCE))
            .or_else(|| auto_detect_role(column).map(|d| (d.role, d.confidence)));
        if let Some((role, confidence)) = hit {
            if confidence >= thresholds::DETECT_FLOOR {
                detections.push(RoleProposal {
                    physical_column: column.clone(),
                    role,
                    confidence,
                });
            }
        }
    }

    // Strongest claim per role wins.
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .expect("confidences are finite")
    });
    let mut used = Vec::new();
    detections
        .into_iter()
        .filter(|d| {
            if used.contains(&d.role) {
                false
            } else {
                used.push(d.role);
                true
            }
        })
        .collect()
}

// ============================================================================
// Data-driven analysis
// ============================================================================

/// Aggregate statistics of a column, computed over the live table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub null_count: u64,
    pub distinct_count: u64,
    pub total_count: u64,
}

/// Input to [`analyze_columns`]: one column with its evidence.
#[derive(Debug, Clone)]
pub struct ColumnObservation {
    pub physical_column: String,
    pub sample_values: Vec<String>,
    pub statistics: Option<ColumnStatistics>,
}

/// Result of analysing a batch of unmapped columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSuggestions {
    pub proposals: Vec<RoleProposal>,
    pub warnings: Vec<String>,
    pub unmapped_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueShape {
    Boolean,
    Integer,
    Percentage,
    Decimal,
    Date,
    Text,
}

fn detect_shape(values: &[String]) -> ValueShape {
    let clean: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if clean.is_empty() {
        return ValueShape::Text;
    }

    if clean
        .iter()
        .all(|v| matches!(*v, "0" | "1" | "true" | "false"))
    {
        return ValueShape::Boolean;
    }

    // A percentage needs the explicit suffix: bare small numbers are just
    // as likely unit prices or quantities.
    let percent_body = |v: &str| {
        v.strip_suffix('%')
            .map(|body| body.trim().replace(',', ".").parse::<f64>().is_ok())
            .unwrap_or(false)
    };
    if clean.iter().all(|v| percent_body(v)) {
        return ValueShape::Percentage;
    }

    let parsed: Vec<Option<f64>> = clean
        .iter()
        .map(|v| v.replace(',', ".").parse::<f64>().ok())
        .collect();
    if parsed.iter().all(|p| p.is_some()) {
        let nums: Vec<f64> = parsed.into_iter().flatten().collect();
        if nums.iter().all(|n| n.fract() == 0.0) {
            return ValueShape::Integer;
        }
        return ValueShape::Decimal;
    }

    let date_like = |v: &str| {
        let bytes = v.as_bytes();
        (v.len() >= 10 && bytes[4] == b'-' && bytes[7] == b'-')
            || (v.len() >= 10 && (bytes[2] == b'/' || bytes[2] == b'-') && bytes[5] == bytes[2])
    };
    if clean.iter().all(|v| date_like(v)) {
        return ValueShape::Date;
    }

    ValueShape::Text
}

fn name_suggestion(column: &str) -> Option<(LogicalRole, f64)> {
    // The analysis path scores name hits slightly lower than raw detection:
    // it will be cross-checked against data evidence.
    auto_detect_role(column).map(|d| {
        let conf = if d.confidence == detect_confidence::PRIMARY {
            0.90
        } else {
            0.75
        };
        (d.role, conf)
    })
}

fn data_suggestion(
    column: &str,
    shape: ValueShape,
    stats: Option<&ColumnStatistics>,
) -> Option<(LogicalRole, f64)> {
    let lower = column.to_lowercase();
    match shape {
        ValueShape::Decimal => {
            let stats = stats?;
            let (avg, max) = (stats.avg?, stats.max?);
            if avg > 0.0 && avg < 10.0 && max < 50.0 {
                // Small unit values: raw-material cost territory.
                if lower.contains("cost") || lower.contains("costo") || lower.contains("acquisto")
                {
                    return Some((LogicalRole::Cost, 0.85));
                }
            }
            if avg > 5.0 && avg < 100.0 {
                if lower.contains("prezz") || lower.contains("price") || lower.contains("pvp") {
                    return Some((LogicalRole::Price, 0.85));
                }
                if lower.contains("final") || lower.contains("total") || lower.contains("importo")
                {
                    return Some((LogicalRole::RevenueAmount, 0.80));
                }
            }
            None
        }
        ValueShape::Integer => {
            let stats = stats?;
            if stats.distinct_count < 20
                && stats.avg.is_some_and(|a| a < 10.0)
                && (lower.contains("quant") || lower.contains("qty") || lower.contains("pezz"))
            {
                return Some((LogicalRole::Quantity, 0.85));
            }
            None
        }
        ValueShape::Date => {
            if lower.contains("data") || lower.contains("date") || lower.contains("time") {
                Some((LogicalRole::OrderDate, 0.80))
            } else {
                None
            }
        }
        ValueShape::Text => {
            if lower.contains("categ") || lower.contains("tipo") || lower.contains("group") {
                Some((LogicalRole::Category, 0.75))
            } else if lower.contains("prod") || lower.contains("item") || lower.contains("descr")
            {
                Some((LogicalRole::ProductName, 0.70))
            } else if lower.contains("pagam") || lower.contains("payment") || lower.contains("paga")
            {
                Some((LogicalRole::PaymentMethod, 0.75))
            } else {
                None
            }
        }
        ValueShape::Boolean | ValueShape::Percentage => None,
    }
}

/// Combine name and data evidence for a batch of unmapped columns.
///
/// Agreement boosts confidence by [`thresholds::AGREEMENT_BOOST`] (capped at
/// [`thresholds::AUTO_CAP`]); disagreement sides with the data evidence and
/// records a warning. Columns with multiple candidates for the same role
/// produce a duplicate-role warning so the consultant picks one.
pub fn analyze_columns(observations: &[ColumnObservation]) -> MappingSuggestions {
    let mut out = MappingSuggestions::default();
    let mut role_claims: HashMap<LogicalRole, Vec<String>> = HashMap::new();

    for obs in observations {
        let shape = detect_shape(&obs.sample_values);
        let name = name_suggestion(&obs.physical_column);
        let data = data_suggestion(&obs.physical_column, shape, obs.statistics.as_ref());

        let chosen = match (name, data) {
            (Some((nr, nc)), Some((dr, dc))) => {
                if nr == dr {
                    Some((nr, (nc + thresholds::AGREEMENT_BOOST).min(thresholds::AUTO_CAP)))
                } else {
                    out.warnings.push(format!(
                        "conflict for \"{}\": name suggests {nr}, data suggests {dr}",
                        obs.physical_column
                    ));
                    if dc >= nc {
                        Some((dr, dc))
                    } else {
                        Some((nr, nc))
                    }
                }
            }
            (Some(name_only), None) => Some(name_only),
            (None, Some(data_only)) => Some(data_only),
            (None, None) => None,
        };

        match chosen {
            Some((role, confidence)) => {
                role_claims
                    .entry(role)
                    .or_default()
                    .push(obs.physical_column.clone());
                out.proposals.push(RoleProposal {
                    physical_column: obs.physical_column.clone(),
                    role,
                    confidence,
                });
            }
            None => out.unmapped_columns.push(obs.physical_column.clone()),
        }
    }

    for (role, columns) in role_claims {
        if columns.len() > 1 {
            out.warnings.push(format!(
                "found {} candidate columns for \"{}\": {}. Pick one.",
                columns.len(),
                role.display_name(),
                columns.join(", ")
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn each_role_is_claimed_once() {
        // Both map to Price; "prezzo" is the primary pattern and wins.
        let proposals = auto_detect_all_columns(&cols(&["prezzo_unitario", "prezzo"]), &[]);
        let price: Vec<_> = proposals
            .iter()
            .filter(|p| p.role == LogicalRole::Price)
            .collect();
        assert_eq!(price.len(), 1);
        assert_eq!(price[0].physical_column, "prezzo");
        assert_eq!(price[0].confidence, 0.95);
    }

    #[test]
    fn custom_rules_override_the_registry() {
        // "descrizione" would hit ProductName in the registry.
        let rules = vec![CustomRule {
            match_type: RuleMatch::Exact,
            pattern: "descrizione".into(),
            role: LogicalRole::Category,
            priority: 0,
        }];
        let proposals = auto_detect_all_columns(&cols(&["descrizione"]), &rules);
        assert_eq!(proposals[0].role, LogicalRole::Category);
        assert_eq!(proposals[0].confidence, CUSTOM_RULE_CONFIDENCE);
    }

    #[test]
    fn floor_discards_weak_detections() {
        // No registry pattern at all.
        let proposals = auto_detect_all_columns(&cols(&["zzz_interna"]), &[]);
        assert!(proposals.is_empty());
    }

    fn obs(name: &str, values: &[&str], stats: Option<ColumnStatistics>) -> ColumnObservation {
        ColumnObservation {
            physical_column: name.into(),
            sample_values: values.iter().map(|s| s.to_string()).collect(),
            statistics: stats,
        }
    }

    fn stats(min: f64, max: f64, avg: f64, distinct: u64) -> ColumnStatistics {
        ColumnStatistics {
            min: Some(min),
            max: Some(max),
            avg: Some(avg),
            null_count: 0,
            distinct_count: distinct,
            total_count: 100,
        }
    }

    #[test]
    fn agreement_boosts_confidence() {
        let suggestions = analyze_columns(&[obs(
            "prezzo",
            &["12.5", "9.9", "22.0"],
            Some(stats(5.0, 40.0, 15.0, 50)),
        )]);
        let p = &suggestions.proposals[0];
        assert_eq!(p.role, LogicalRole::Price);
        // Name says 0.90, data agrees: capped boost.
        assert_eq!(p.confidence, thresholds::AUTO_CAP);
    }

    #[test]
    fn small_decimals_are_prices_not_percentages() {
        let vals = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        // Unit prices sit in the 0-100 range too; only the suffix decides.
        assert_eq!(detect_shape(&vals(&["12.5", "9.9", "22.0"])), ValueShape::Decimal);
        assert_eq!(detect_shape(&vals(&["22%", "4,5%", "10 %"])), ValueShape::Percentage);
    }

    #[test]
    fn conflicting_evidence_warns_and_keeps_the_stronger_side() {
        // Name says Quantity (0.85 via registry -> 0.75 here), data says
        // Price (0.85): data wins and the conflict is surfaced.
        let suggestions = analyze_columns(&[obs(
            "qta_prezzo_medio",
            &["12.5", "9.9"],
            Some(stats(5.0, 40.0, 15.0, 50)),
        )]);
        assert!(suggestions
            .warnings
            .iter()
            .any(|w| w.contains("conflict")));
    }

    #[test]
    fn duplicate_role_candidates_warn() {
        let suggestions = analyze_columns(&[
            obs("prezzo", &["12.5"], Some(stats(5.0, 40.0, 15.0, 50))),
            obs("listino", &["10.0"], Some(stats(5.0, 40.0, 12.0, 30))),
        ]);
        assert!(suggestions
            .warnings
            .iter()
            .any(|w| w.contains("Selling Price")));
    }

    #[test]
    fn unmatched_columns_are_reported() {
        let suggestions = analyze_columns(&[obs("xyz", &["foo", "bar"], None)]);
        assert!(suggestions.proposals.is_empty());
        assert_eq!(suggestions.unmapped_columns, vec!["xyz".to_string()]);
    }
}
