//! Semantic mappings: binding physical columns to logical roles.
//!
//! A mapping is a claim that column `prezzo_unitario` of dataset 42 carries
//! the role `price`. Claims start life as proposals with a confidence score;
//! high-confidence ones auto-approve, the rest wait for the consultant. The
//! analytics gate stays closed while any critical role has an unresolved
//! claim, because a wrong `price` binding silently corrupts every metric
//! downstream.

pub mod detect;
pub mod store;

pub use detect::{
    analyze_columns, auto_detect_all_columns, ColumnObservation, ColumnStatistics, CustomRule,
    MappingSuggestions, RoleProposal, RuleMatch,
};
pub use store::{MappingError, MappingResult, MappingStore};

use serde::{Deserialize, Serialize};

use crate::model::LogicalRole;

/// Confidence thresholds for the mapping lifecycle.
pub mod thresholds {
    /// Proposals at or above this confidence auto-approve.
    pub const AUTO_APPROVE: f64 = 0.90;
    /// Critical roles need a stricter bar to auto-approve.
    pub const AUTO_APPROVE_CRITICAL: f64 = 0.95;
    /// Proposals below this floor are discarded outright.
    pub const DETECT_FLOOR: f64 = 0.70;
    /// Boost applied when name-based and data-based detection agree.
    pub const AGREEMENT_BOOST: f64 = 0.10;
    /// Cap on any automatically derived confidence.
    pub const AUTO_CAP: f64 = 0.95;
}

/// Lifecycle state of a mapping claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Confirmed => "confirmed",
            MappingStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<MappingStatus> {
        match s {
            "pending" => Some(MappingStatus::Pending),
            "confirmed" => Some(MappingStatus::Confirmed),
            "rejected" => Some(MappingStatus::Rejected),
            _ => None,
        }
    }
}

/// One column-to-role binding claim for a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMapping {
    pub dataset_id: i64,
    pub physical_column: String,
    pub logical_role: LogicalRole,
    pub confidence: f64,
    pub status: MappingStatus,
    /// True when the claim cleared its threshold without human review.
    pub auto_approved: bool,
    pub is_critical: bool,
}

impl SemanticMapping {
    /// Threshold this mapping must clear to auto-approve.
    pub fn auto_approve_threshold(&self) -> f64 {
        if self.is_critical {
            thresholds::AUTO_APPROVE_CRITICAL
        } else {
            thresholds::AUTO_APPROVE
        }
    }
}

/// Build a proposal in its initial lifecycle state: confirmed and
/// auto-approved if confidence clears the role's threshold, pending
/// otherwise.
pub fn new_proposal(
    dataset_id: i64,
    physical_column: impl Into<String>,
    logical_role: LogicalRole,
    confidence: f64,
) -> SemanticMapping {
    let is_critical = logical_role.is_critical();
    let threshold = if is_critical {
        thresholds::AUTO_APPROVE_CRITICAL
    } else {
        thresholds::AUTO_APPROVE
    };
    let auto = confidence >= threshold;
    SemanticMapping {
        dataset_id,
        physical_column: physical_column.into(),
        logical_role,
        confidence,
        status: if auto {
            MappingStatus::Confirmed
        } else {
            MappingStatus::Pending
        },
        auto_approved: auto,
        is_critical,
    }
}

/// Resolve the physical column bound to a role, falling back to the role's
/// aliases (`document_id` can be served by a confirmed `order_id` binding).
pub fn resolve_with_aliases<'a>(
    role: LogicalRole,
    confirmed: &'a [(LogicalRole, String)],
) -> Option<&'a str> {
    if let Some((_, col)) = confirmed.iter().find(|(r, _)| *r == role) {
        return Some(col);
    }
    for alias in role.aliases() {
        if let Some((_, col)) = confirmed.iter().find(|(r, _)| r == alias) {
            return Some(col);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_roles_need_the_stricter_bar() {
        // 0.92 clears the general bar but not the critical one.
        let price = new_proposal(1, "prezzo", LogicalRole::Price, 0.92);
        assert_eq!(price.status, MappingStatus::Pending);
        assert!(!price.auto_approved);

        let staff = new_proposal(1, "cameriere", LogicalRole::Staff, 0.92);
        assert_eq!(staff.status, MappingStatus::Confirmed);
        assert!(staff.auto_approved);
    }

    #[test]
    fn exact_threshold_auto_approves() {
        let m = new_proposal(1, "prezzo", LogicalRole::Price, 0.95);
        assert_eq!(m.status, MappingStatus::Confirmed);
        assert!(m.is_critical);
    }

    #[test]
    fn alias_resolution_bridges_document_and_order_ids() {
        let confirmed = vec![(LogicalRole::OrderId, "num_ordine".to_string())];
        assert_eq!(
            resolve_with_aliases(LogicalRole::DocumentId, &confirmed),
            Some("num_ordine")
        );
        assert_eq!(resolve_with_aliases(LogicalRole::Price, &confirmed), None);
    }

    #[test]
    fn status_round_trips() {
        for s in [
            MappingStatus::Pending,
            MappingStatus::Confirmed,
            MappingStatus::Rejected,
        ] {
            assert_eq!(MappingStatus::parse(s.as_str()), Some(s));
        }
    }
}
