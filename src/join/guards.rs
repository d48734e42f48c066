//! Hard safety guards for join candidates.
//!
//! A guard rejection is absolute: no score can override it. These exist
//! because numeric columns overlap by accident all the time (quantities vs
//! row ids, percentages vs codes) and a bad join silently multiplies or
//! mislabels every metric computed over the result.

use super::profile::{is_category_named, is_id_named, ColumnProfile, ColumnRole};
use super::scoring::ScoringFactors;

/// Thresholds for the guard conditions.
pub mod limits {
    /// FK rows per PK row above which a small-dimension join risks row
    /// multiplication.
    pub const ROW_MULTIPLICATION_FACTOR: u64 = 10;
    /// A PK-side file smaller than this is a "small dimension".
    pub const SMALL_DIMENSION_ROWS: u64 = 100;
    /// FK distinct ratio below which the FK is too low-cardinality to
    /// credibly reference a near-unique PK.
    pub const LOW_CARDINALITY_FK: f64 = 0.05;
    /// PK uniqueness at which the low-cardinality guard applies.
    pub const HIGH_UNIQUENESS_PK: f64 = 0.95;
}

/// Why a candidate was rejected. Stable identifiers, logged and surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    /// Category-named column on one side, technical-id-named on the other.
    CategoryIdMismatch,
    /// A fact table may only offer key-role or name-rooted FK columns.
    FactNonKeyColumn,
    /// Joining would multiply fact rows against a small dimension.
    RowMultiplication,
    /// FK cardinality is far too low for the PK it claims to reference.
    LowCardinalityFk,
}

impl GuardRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardRejection::CategoryIdMismatch => "category_id_mismatch",
            GuardRejection::FactNonKeyColumn => "fact_non_key_column",
            GuardRejection::RowMultiplication => "row_multiplication",
            GuardRejection::LowCardinalityFk => "low_cardinality_fk",
        }
    }
}

/// Context a guard check needs beyond the two column profiles.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext {
    /// True when the FK side is the fact table (max-row file).
    pub fk_is_fact: bool,
    /// Full row counts of the two files.
    pub fk_rows: u64,
    pub pk_rows: u64,
}

/// Run every guard; the first failure wins.
pub fn check(
    fk: &ColumnProfile,
    pk: &ColumnProfile,
    factors: &ScoringFactors,
    ctx: GuardContext,
) -> Option<GuardRejection> {
    // A descriptive column never joins a technical id, whichever side it
    // sits on. "tipologia" overlapping "line_id" numerically is noise.
    let category_vs_id = (is_category_named(&fk.normalized) && is_id_named(&pk.normalized))
        || (is_id_named(&fk.normalized) && is_category_named(&pk.normalized));
    if category_vs_id {
        return Some(GuardRejection::CategoryIdMismatch);
    }

    if ctx.fk_is_fact && fk.role != ColumnRole::Key && !factors.name_rooted() {
        return Some(GuardRejection::FactNonKeyColumn);
    }

    if fk.role != ColumnRole::Key
        && ctx.pk_rows < limits::SMALL_DIMENSION_ROWS
        && ctx.fk_rows > limits::ROW_MULTIPLICATION_FACTOR * ctx.pk_rows
        && (fk.distinct_count as u64) < ctx.pk_rows
    {
        return Some(GuardRejection::RowMultiplication);
    }

    if fk.unique_ratio < limits::LOW_CARDINALITY_FK
        && pk.unique_ratio >= limits::HIGH_UNIQUENESS_PK
        && !factors.name_rooted()
    {
        return Some(GuardRejection::LowCardinalityFk);
    }

    None
}
