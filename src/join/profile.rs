//! Per-file column profiling for join detection.
//!
//! Every column gets a statistical profile (uniqueness, float share,
//! dispersion) and a coarse role tag — key, dimension or measure — that the
//! scorer and the safety guards reason about. Tags are heuristic; they bias
//! scores and trip guards, they never bind columns on their own.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Coarse semantic role of a column within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Identifier-like: joins happen through these.
    Key,
    /// Low-cardinality descriptive attribute.
    Dimension,
    /// Numeric quantity; never a join column.
    Measure,
    /// Nothing conclusive.
    Unknown,
}

/// Thresholds for role tagging and PK candidacy.
pub mod thresholds {
    /// Uniqueness at or above this (with integer values) tags a key.
    pub const KEY_UNIQUE_RATIO: f64 = 0.9;
    /// Uniqueness below this tags a dimension.
    pub const DIMENSION_UNIQUE_RATIO: f64 = 0.1;
    /// Share of float-shaped values above which a column is a measure.
    pub const MEASURE_FLOAT_RATIO: f64 = 0.5;
    /// Coefficient of variation above which a numeric column is a measure.
    pub const MEASURE_CV: f64 = 1.0;
    /// Minimum uniqueness for a primary-key candidate.
    pub const PK_UNIQUE_RATIO: f64 = 0.95;
    /// Sample values considered per column.
    pub const MAX_SAMPLE_VALUES: usize = 500;
}

/// Suffixes and prefixes marking identifier columns.
const KEY_AFFIXES: [&str; 6] = ["id", "code", "codice", "cod", "sku", "key"];

/// Names describing categorical attributes.
const DIMENSION_TERMS: [&str; 12] = [
    "categoria",
    "category",
    "tipologia",
    "tipo",
    "famiglia",
    "gruppo",
    "group",
    "reparto",
    "stato",
    "status",
    "canale",
    "channel",
];

/// Lowercase, fold accents, strip everything non-alphanumeric. Used for all
/// cross-file name comparison.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter_map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => Some('a'),
            'è' | 'é' | 'ê' | 'ë' => Some('e'),
            'ì' | 'í' | 'î' | 'ï' => Some('i'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => Some('o'),
            'ù' | 'ú' | 'û' | 'ü' => Some('u'),
            c if c.is_ascii_alphanumeric() => Some(c),
            _ => None,
        })
        .collect()
}

/// Whether a normalized name is identifier-shaped.
pub fn is_id_named(normalized: &str) -> bool {
    KEY_AFFIXES.iter().any(|affix| {
        normalized == *affix
            || normalized.ends_with(affix)
            || normalized.starts_with(affix)
    })
}

/// Whether a normalized name describes a categorical attribute.
pub fn is_category_named(normalized: &str) -> bool {
    DIMENSION_TERMS.iter().any(|term| normalized.contains(term))
}

/// One file's sampled shape, as handed to the detector.
#[derive(Debug, Clone)]
pub struct FileProfile {
    pub filename: String,
    /// Staging table that materialized this file.
    pub table_name: String,
    pub columns: Vec<String>,
    pub sample_values: HashMap<String, Vec<String>>,
    /// Full-file row count, not sample size.
    pub row_count: u64,
}

impl FileProfile {
    pub fn new(
        filename: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<String>,
        sample_values: HashMap<String, Vec<String>>,
        row_count: u64,
    ) -> Self {
        // Cap samples so pathologically wide uploads stay cheap.
        let sample_values = sample_values
            .into_iter()
            .map(|(k, mut v)| {
                v.truncate(thresholds::MAX_SAMPLE_VALUES);
                (k, v)
            })
            .collect();
        FileProfile {
            filename: filename.into(),
            table_name: table_name.into(),
            columns,
            sample_values,
            row_count,
        }
    }

    /// Profile every column of this file.
    pub fn profile_columns(&self) -> Vec<ColumnProfile> {
        self.columns
            .iter()
            .map(|name| {
                let values = self
                    .sample_values
                    .get(name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                ColumnProfile::build(name, values)
            })
            .collect()
    }
}

/// Statistical profile of one column's sample.
#[derive(Debug, Clone)]
pub struct ColumnProfile {
    pub name: String,
    pub normalized: String,
    pub distinct_count: usize,
    pub value_count: usize,
    pub unique_ratio: f64,
    pub float_ratio: f64,
    /// True when every value parses as an integer.
    pub all_integer: bool,
    pub role: ColumnRole,
}

impl ColumnProfile {
    pub fn build(name: &str, values: &[String]) -> ColumnProfile {
        let normalized = normalize_name(name);
        let value_count = values.len();
        let distinct_count = values.iter().collect::<HashSet<_>>().len();
        let unique_ratio = if value_count == 0 {
            0.0
        } else {
            distinct_count as f64 / value_count as f64
        };

        let mut floats = 0usize;
        let mut integers = 0usize;
        let mut nums: Vec<f64> = Vec::new();
        for v in values {
            let t = v.trim();
            if let Ok(n) = t.parse::<i64>() {
                integers += 1;
                nums.push(n as f64);
            } else if let Ok(f) = t.replace(',', ".").parse::<f64>() {
                floats += 1;
                nums.push(f);
            }
        }
        let float_ratio = if value_count == 0 {
            0.0
        } else {
            floats as f64 / value_count as f64
        };
        let all_integer = value_count > 0 && integers == value_count;

        let cv = coefficient_of_variation(&nums);
        let role = tag_role(&normalized, unique_ratio, float_ratio, all_integer, cv);

        ColumnProfile {
            name: name.to_string(),
            normalized,
            distinct_count,
            value_count,
            unique_ratio,
            float_ratio,
            all_integer,
            role,
        }
    }

    /// PK candidates must look like identifiers: near-unique, not measures,
    /// no float-shaped values.
    pub fn is_pk_candidate(&self) -> bool {
        self.role != ColumnRole::Measure
            && self.value_count > 0
            && self.unique_ratio >= thresholds::PK_UNIQUE_RATIO
            && self.float_ratio == 0.0
    }
}

fn coefficient_of_variation(nums: &[f64]) -> f64 {
    if nums.len() < 2 {
        return 0.0;
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    if mean.abs() < f64::EPSILON {
        return 0.0;
    }
    let var = nums.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / nums.len() as f64;
    var.sqrt() / mean.abs()
}

fn tag_role(
    normalized: &str,
    unique_ratio: f64,
    float_ratio: f64,
    all_integer: bool,
    cv: f64,
) -> ColumnRole {
    if is_category_named(normalized) {
        return ColumnRole::Dimension;
    }
    if is_id_named(normalized) {
        return ColumnRole::Key;
    }
    if float_ratio > thresholds::MEASURE_FLOAT_RATIO {
        return ColumnRole::Measure;
    }
    if all_integer && unique_ratio >= thresholds::KEY_UNIQUE_RATIO {
        return ColumnRole::Key;
    }
    if all_integer && cv > thresholds::MEASURE_CV {
        return ColumnRole::Measure;
    }
    if unique_ratio < thresholds::DIMENSION_UNIQUE_RATIO {
        return ColumnRole::Dimension;
    }
    ColumnRole::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn id_suffix_tags_key() {
        let p = ColumnProfile::build("cliente_id", &vals(&["1", "2", "2", "3"]));
        assert_eq!(p.role, ColumnRole::Key);
    }

    #[test]
    fn category_name_beats_uniqueness() {
        // Even a fairly distinct "tipologia" stays a dimension.
        let p = ColumnProfile::build("tipologia", &vals(&["a", "b", "c", "d"]));
        assert_eq!(p.role, ColumnRole::Dimension);
    }

    #[test]
    fn float_values_tag_measure() {
        let p = ColumnProfile::build("valore", &vals(&["12.5", "8.7", "99.0"]));
        assert_eq!(p.role, ColumnRole::Measure);
        assert!(!p.is_pk_candidate());
    }

    #[test]
    fn repeated_text_tags_dimension() {
        let values: Vec<String> = (0..50).map(|i| format!("v{}", i % 3)).collect();
        let p = ColumnProfile::build("colonna", &values);
        assert_eq!(p.role, ColumnRole::Dimension);
    }

    #[test]
    fn pk_candidate_requires_near_uniqueness() {
        let unique: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        let p = ColumnProfile::build("codice", &unique);
        assert!(p.is_pk_candidate());

        let repeated = vals(&["1", "1", "2", "2"]);
        let p = ColumnProfile::build("codice", &repeated);
        assert!(!p.is_pk_candidate());
    }

    #[test]
    fn normalization_folds_accents() {
        assert_eq!(normalize_name("Quantità_ID"), "quantitaid");
    }
}
