//! Value-shape detection over sampled cells.
//!
//! Each sampled value is matched against a fixed set of shapes (dates,
//! European currency, percentages, integers, decimals, emails, phones,
//! booleans) and the majority shape wins with the match ratio as its
//! confidence. Spreadsheet noise tokens are stripped first so one `#REF!`
//! column does not drag an otherwise clean numeric column to TEXT.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::DataType;

// ============================================================================
// Shape regexes
// ============================================================================

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> =
            Lazy::new(|| Regex::new($re).expect("value pattern must compile"));
    };
}

pattern!(DATE_DMY, r"^\d{2}[-/]\d{2}[-/]\d{4}$");
pattern!(DATE_YMD, r"^\d{4}[-/]\d{2}[-/]\d{2}$");
pattern!(DATE_ISO, r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}");
pattern!(IMPORTO_EU, r"^-?\d{1,3}(?:[.,]\d{3})*(?:[.,]\d{2})?€?$");
pattern!(IMPORTO_SIMPLE, r"^-?€?\s?\d+(?:[.,]\d{1,2})?$");
pattern!(PERCENTAGE, r"^-?\d+(?:[.,]\d+)?%$");
pattern!(INTEGER, r"^-?\d+$");
pattern!(DECIMAL, r"^-?\d+[.,]\d+$");
pattern!(PHONE, r"^(?:\+?\d{1,3}[-.\s]?)?\d{6,}$");
pattern!(EMAIL, r"^[^\s@]+@[^\s@]+\.[^\s@]+$");
pattern!(BOOLEAN_IT, r"^(?i:si|no|vero|falso|true|false|1|0)$");

/// Spreadsheet artifacts that carry no information about the column's type.
const DIRTY_TOKENS: [&str; 7] = ["#REF!", "#DIV/0!", "#VALUE!", "#N/A", "N/A", "NULL", "-"];

fn is_dirty(value: &str) -> bool {
    DIRTY_TOKENS
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
}

// ============================================================================
// Scan
// ============================================================================

/// Named thresholds driving the scan.
pub mod thresholds {
    /// Integer classification requires this share of clean values to be
    /// bare integers; below it the column is NUMERIC, because a column
    /// mixing `12` and `12,50` is an amount, not a count.
    pub const INTEGER_PURITY: f64 = 0.95;
    /// Confidence assigned when every sampled value was null or dirty.
    pub const EMPTY_FALLBACK: f64 = 0.5;
    /// Confidence of the TEXT fallback when no shape matched.
    pub const TEXT_FALLBACK: f64 = 0.7;
}

/// Outcome of a value-shape scan over one column's sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternScan {
    pub data_type: DataType,
    pub confidence: f64,
    /// Name of the winning shape, when one matched.
    pub pattern: Option<&'static str>,
    /// Share of raw values that were noise tokens.
    pub dirty_ratio: f64,
}

/// Scan sampled values and return the majority shape.
pub fn detect_patterns(values: &[String]) -> PatternScan {
    let raw_count = values.len();
    let clean: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !is_dirty(v))
        .collect();
    let dirty_ratio = if raw_count == 0 {
        0.0
    } else {
        (raw_count - clean.len()) as f64 / raw_count as f64
    };

    if clean.is_empty() {
        return PatternScan {
            data_type: DataType::Text,
            confidence: thresholds::EMPTY_FALLBACK,
            pattern: None,
            dirty_ratio,
        };
    }

    let total = clean.len() as f64;
    let mut dates = 0usize;
    let mut amounts = 0usize;
    let mut percentages = 0usize;
    let mut integers = 0usize;
    let mut decimals = 0usize;
    let mut emails = 0usize;
    let mut phones = 0usize;
    let mut booleans = 0usize;

    // "1" and "0" only read as booleans in a column made entirely of
    // boolean tokens; inside a numeric column they are just small integers.
    let all_boolean = clean.iter().all(|v| BOOLEAN_IT.is_match(v));

    for val in &clean {
        if DATE_DMY.is_match(val) || DATE_YMD.is_match(val) || DATE_ISO.is_match(val) {
            dates += 1;
        } else if PERCENTAGE.is_match(val) {
            percentages += 1;
        } else if EMAIL.is_match(val) {
            emails += 1;
        } else if PHONE.is_match(val) {
            phones += 1;
        } else if BOOLEAN_IT.is_match(val) && (all_boolean || !INTEGER.is_match(val)) {
            booleans += 1;
        } else if IMPORTO_EU.is_match(val) || IMPORTO_SIMPLE.is_match(val) {
            // Comma-only values are unambiguously European decimals; a bare
            // integer that also fits the currency shape stays an integer.
            let stripped = val.replace('€', "");
            let stripped = stripped.trim();
            if (val.contains(',') && !val.contains('.')) || DECIMAL.is_match(stripped) {
                amounts += 1;
            } else if INTEGER.is_match(stripped) {
                integers += 1;
            }
        } else if DECIMAL.is_match(val) {
            decimals += 1;
        } else if INTEGER.is_match(val) {
            integers += 1;
        }
    }

    let mut candidates: Vec<(DataType, f64, &'static str)> = Vec::new();
    if dates > 0 {
        candidates.push((DataType::Date, dates as f64 / total, "DATE"));
    }
    if percentages > 0 {
        candidates.push((DataType::Numeric, percentages as f64 / total, "PERCENTAGE"));
    }
    if emails > 0 {
        candidates.push((DataType::Text, emails as f64 / total, "EMAIL"));
    }
    if phones > 0 {
        candidates.push((DataType::Text, phones as f64 / total, "PHONE"));
    }
    if booleans > 0 {
        candidates.push((DataType::Boolean, booleans as f64 / total, "BOOLEAN"));
    }
    if amounts > 0 {
        candidates.push((DataType::Numeric, amounts as f64 / total, "IMPORTO"));
    }
    if decimals > 0 {
        candidates.push((DataType::Numeric, decimals as f64 / total, "DECIMAL"));
    }
    if integers > 0 {
        let ratio = integers as f64 / total;
        if ratio >= thresholds::INTEGER_PURITY {
            candidates.push((DataType::Integer, ratio, "INTEGER"));
        } else {
            candidates.push((DataType::Numeric, ratio, "NUMERIC"));
        }
    }

    match candidates
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).expect("ratios are finite"))
    {
        Some((data_type, confidence, pattern)) => PatternScan {
            data_type,
            confidence,
            pattern: Some(pattern),
            dirty_ratio,
        },
        None => PatternScan {
            data_type: DataType::Text,
            confidence: thresholds::TEXT_FALLBACK,
            pattern: None,
            dirty_ratio,
        },
    }
}
