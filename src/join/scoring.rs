//! Table-driven join candidate scoring.
//!
//! Every signal is a named weight; the score is a plain weighted sum so the
//! acceptance scenarios stay assertable against fixed numbers.

use super::profile::{is_id_named, ColumnProfile, ColumnRole};
use serde::{Deserialize, Serialize};

/// Scoring weights. Coverage dominates; name evidence refines; the
/// dimension-vs-key penalty keeps descriptive columns out of key joins.
pub mod weights {
    /// Multiplied by the coverage ratio ∈ [0, 1].
    pub const COVERAGE_BASE: f64 = 100.0;
    /// Exact (normalized) name match, unless the name is generic.
    pub const EXACT_NAME: f64 = 30.0;
    /// Both names share the same root after stripping id/code affixes.
    pub const ID_ROOT: f64 = 15.0;
    /// Both names carry the same business-entity root.
    pub const SEMANTIC_ROOT: f64 = 20.0;
    /// The PK side is ≥99% unique.
    pub const PK_HIGH_UNIQUENESS: f64 = 10.0;
    /// A dimension-tagged FK joining a key-tagged PK under different names.
    pub const DIMENSION_KEY_MISMATCH: f64 = -40.0;
    /// Denominator for normalizing score into a confidence.
    pub const MAX_SCORE: f64 = 145.0;
    /// Minimum score for a candidate to be used in star assembly.
    pub const ACCEPT_FLOOR: f64 = 50.0;
    /// How much the floor drops in the relaxed fallback pass.
    pub const RELAXED_FLOOR_DROP: f64 = 20.0;
}

/// Coverage thresholds for proposing a candidate at all.
pub mod coverage {
    /// Normal minimum: half the FK's distinct values must hit the PK.
    pub const MIN: f64 = 0.50;
    /// With an exact name match, any nonzero overlap is worth proposing.
    pub const MIN_EXACT_NAME: f64 = 0.01;
    /// Relaxed fallback still requires this much overlap.
    pub const RELAXED_MIN: f64 = 0.50;
    /// PK side uniqueness granting the high-uniqueness bonus.
    pub const PK_HIGH_UNIQUE: f64 = 0.99;
}

/// Names too generic for the exact-name bonus: they collide across
/// unrelated files constantly.
const GENERIC_NAMES: [&str; 10] = [
    "id",
    "codice",
    "code",
    "data",
    "date",
    "tipo",
    "descrizione",
    "nome",
    "numero",
    "valore",
];

/// Business-entity roots: two columns sharing one of these likely reference
/// the same entity even when spelled differently.
const SEMANTIC_ROOTS: [&str; 12] = [
    "client", "cliente", "customer", "prodot", "product", "articol", "fornitor", "supplier",
    "ordin", "order", "document", "fattur",
];

/// The named signals extracted from one (FK, PK) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringFactors {
    pub coverage: f64,
    pub exact_name: bool,
    pub shared_id_root: bool,
    pub shared_semantic_root: bool,
    pub pk_high_uniqueness: bool,
    pub dimension_key_mismatch: bool,
}

impl ScoringFactors {
    /// Extract factors from two column profiles plus their coverage.
    pub fn extract(fk: &ColumnProfile, pk: &ColumnProfile, coverage: f64) -> ScoringFactors {
        let exact_name =
            fk.normalized == pk.normalized && !GENERIC_NAMES.contains(&fk.normalized.as_str());
        ScoringFactors {
            coverage,
            exact_name,
            shared_id_root: !exact_name && shared_id_root(&fk.normalized, &pk.normalized),
            shared_semantic_root: shared_semantic_root(&fk.normalized, &pk.normalized),
            pk_high_uniqueness: pk.unique_ratio >= coverage::PK_HIGH_UNIQUE,
            dimension_key_mismatch: fk.role == ColumnRole::Dimension
                && pk.role == ColumnRole::Key
                && fk.normalized != pk.normalized,
        }
    }

    /// Weighted sum of the signals.
    pub fn score(&self) -> f64 {
        let mut score = weights::COVERAGE_BASE * self.coverage;
        if self.exact_name {
            score += weights::EXACT_NAME;
        }
        if self.shared_id_root {
            score += weights::ID_ROOT;
        }
        if self.shared_semantic_root {
            score += weights::SEMANTIC_ROOT;
        }
        if self.pk_high_uniqueness {
            score += weights::PK_HIGH_UNIQUENESS;
        }
        if self.dimension_key_mismatch {
            score += weights::DIMENSION_KEY_MISMATCH;
        }
        score
    }

    /// Score normalized into [0, 1].
    pub fn confidence(&self) -> f64 {
        (self.score() / weights::MAX_SCORE).clamp(0.0, 1.0)
    }

    /// Whether the pair shares any name evidence at all. The fact-table
    /// guard uses this to distinguish name-rooted FKs from blind overlap.
    pub fn name_rooted(&self) -> bool {
        self.exact_name || self.shared_id_root || self.shared_semantic_root
    }
}

/// Strip id/code affixes from a normalized name.
fn strip_id_affixes(normalized: &str) -> &str {
    let mut s = normalized;
    for suffix in ["id", "code", "codice"] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped;
        }
    }
    for prefix in ["id", "cod"] {
        if let Some(stripped) = s.strip_prefix(prefix) {
            s = stripped;
        }
    }
    s
}

fn shared_id_root(a: &str, b: &str) -> bool {
    if !is_id_named(a) && !is_id_named(b) {
        return false;
    }
    let ra = strip_id_affixes(a);
    let rb = strip_id_affixes(b);
    !ra.is_empty() && ra == rb
}

fn shared_semantic_root(a: &str, b: &str) -> bool {
    SEMANTIC_ROOTS
        .iter()
        .any(|root| a.contains(root) && b.contains(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, values: &[&str]) -> ColumnProfile {
        let owned: Vec<String> = values.iter().map(|s| s.to_string()).collect();
        ColumnProfile::build(name, &owned)
    }

    fn unique_ints(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn full_coverage_unique_pk_clears_half_confidence() {
        let ids = unique_ints(100);
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let fk = profile("cliente_id", &id_refs[..80]);
        let pk = profile("id", &id_refs);
        let factors = ScoringFactors::extract(&fk, &pk, 1.0);
        // 100 coverage + 10 uniqueness; no name evidence ("id" is generic
        // and the roots differ).
        assert_eq!(factors.score(), 110.0);
        assert!(factors.confidence() > 0.5);
    }

    #[test]
    fn exact_generic_names_earn_no_bonus() {
        let vals = unique_ints(50);
        let refs: Vec<&str> = vals.iter().map(String::as_str).collect();
        let a = profile("codice", &refs);
        let b = profile("codice", &refs);
        let factors = ScoringFactors::extract(&a, &b, 1.0);
        assert!(!factors.exact_name);
    }

    #[test]
    fn id_root_matches_across_spellings() {
        assert!(shared_id_root("clienteid", "idcliente"));
        assert!(!shared_id_root("clienteid", "prodottoid"));
    }

    #[test]
    fn semantic_root_bridges_languages() {
        assert!(shared_semantic_root("codcliente", "clientenr"));
        assert!(!shared_semantic_root("magazzino", "cliente"));
    }

    #[test]
    fn dimension_into_key_is_penalized() {
        let dim = profile("tipologia", &["a", "a", "b", "b"]);
        let ids = unique_ints(100);
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let key = profile("riga_id", &refs);
        let factors = ScoringFactors::extract(&dim, &key, 0.9);
        assert!(factors.dimension_key_mismatch);
        assert_eq!(factors.score(), 90.0 + 10.0 - 40.0);
    }
}
