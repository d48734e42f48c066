//! Anti-hallucination validation of generated answers.
//!
//! A language model wrote a sentence; the tools computed numbers. This
//! module checks that every number in the sentence traces back to tool
//! output:
//!
//! ```text
//!   answer text ──> extract_numbers ──┐
//!                                     ├──> acceptance ladder ──> report
//!   tool JSON ──> numeric leaves ─────┘
//! ```
//!
//! A number is accepted when it is small prose ("the top 3 categories"),
//! matches a tool number or its rounding, equals the sum or average of the
//! tool numbers, or sits between the largest tool number and the grand
//! total (a partial total). Everything else is an invented number and the
//! answer is not trustworthy. Metric values are independently checked
//! against their declared range rules.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::exec::metrics;

// ============================================================================
// Tolerances
// ============================================================================

pub mod tolerances {
    /// Relative tolerance for a direct match against a tool number.
    pub const DIRECT_MATCH: f64 = 0.05;
    /// Relative tolerance for rounded, sum and average matches.
    pub const DERIVED_MATCH: f64 = 0.02;
    /// A number above the largest tool value still passes as a partial
    /// total up to this multiple of the grand total. Unverified heuristic
    /// carried over as-is.
    pub const PARTIAL_TOTAL_CEILING: f64 = 1.05;
}

/// Tools whose results carry computed data. `get_schema` is metadata only
/// and contributes nothing to the number pool.
const COMPUTE_TOOLS: [&str; 4] = [
    "query_metric",
    "aggregate_group",
    "filter_data",
    "compare_periods",
];

// ============================================================================
// Inputs and report
// ============================================================================

/// One executed tool call, as handed to the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Set when the call evaluated a named metric template.
    #[serde(default)]
    pub metric_name: Option<String>,
}

impl ToolResult {
    fn is_compute(&self) -> bool {
        COMPUTE_TOOLS.contains(&self.tool_name.as_str())
    }

    /// Best-effort row count from the result payload.
    fn row_count(&self) -> Option<u64> {
        let result = self.result.as_ref()?;
        if let Some(count) = result.get("rowCount").and_then(Value::as_u64) {
            return Some(count);
        }
        if let Some(data) = result.get("data").or_else(|| result.get("rows")) {
            if let Some(array) = data.as_array() {
                return Some(array.len() as u64);
            }
        }
        result.as_array().map(|a| a.len() as u64)
    }

    /// The scalar value of a metric-style result, if one exists.
    fn scalar_value(&self) -> Option<f64> {
        let result = self.result.as_ref()?;
        let candidate = result
            .get("result")
            .or_else(|| result.get("value"))
            .or_else(|| {
                result
                    .get("rows")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first())
                    .and_then(|row| row.get("result"))
            })
            .or_else(|| result.as_array().and_then(|a| a.first())?.get("result"))?;
        json_number(candidate)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub numbers_in_answer: Vec<f64>,
    pub numbers_from_tools: Vec<f64>,
    pub invented_numbers: Vec<f64>,
}

// ============================================================================
// Number extraction
// ============================================================================

static CURRENCY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d.,]+\s*[€$£¥%]").expect("currency suffix pattern"));
static CURRENCY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[€$£¥]\s*[\d.,]+").expect("currency prefix pattern"));
static GROUPED_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}(?:[.,]\d{3})*(?:[.,]\d{1,2})?\b").expect("grouped number pattern")
});
static PLAIN_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:[.,]\d+)?\b").expect("plain number pattern"));

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year pattern"));
static SLASHED_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}\b").expect("date pattern"));
static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(0[1-9]|1[0-2])[/\-](0[1-9]|[12]\d|3[01])\b").expect("month-day pattern")
});
static STRIP_SYMBOLS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[€$£¥%\s]").expect("symbol strip pattern"));
static THOUSANDS_DOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(\d{3})").expect("thousands pattern"));

/// Parse a currency/number token, normalizing European formats:
/// `1.234,56` and `1234.56` both come back as `1234.56`.
fn parse_token(token: &str) -> Option<f64> {
    let stripped = STRIP_SYMBOLS.replace_all(token, "");
    let no_thousands = THOUSANDS_DOT.replace_all(&stripped, "$1");
    let normalized = no_thousands.replace(',', ".");
    let value: f64 = normalized.parse().ok()?;
    (value.is_finite() && value != 0.0).then_some(value)
}

/// Pull every numeric token out of prose, skipping date-shaped substrings.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    // Full dates first, then bare month/day pairs and years, so stripping
    // a year does not leave half a date behind as digits.
    let cleaned = SLASHED_DATE.replace_all(text, " ");
    let cleaned = MONTH_DAY.replace_all(&cleaned, " ");
    let cleaned = YEAR.replace_all(&cleaned, " ");

    // Patterns run in priority order and consume their span: once the
    // currency pattern has claimed "1.234,56 €", the plain-number pattern
    // must not re-read its tail as a bare "56".
    let mut consumed: Vec<(usize, usize)> = Vec::new();
    let mut numbers = Vec::new();
    for pattern in [&CURRENCY_SUFFIX, &CURRENCY_PREFIX, &GROUPED_NUMBER, &PLAIN_NUMBER] {
        for token in pattern.find_iter(&cleaned) {
            let (start, end) = (token.start(), token.end());
            if consumed.iter().any(|&(s, e)| start < e && s < end) {
                continue;
            }
            if let Some(value) = parse_token(token.as_str()) {
                consumed.push((start, end));
                if !numbers.contains(&value) {
                    numbers.push(value);
                }
            }
        }
    }
    numbers
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn collect_numeric_leaves(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_numeric_leaves(item, out);
            }
        }
        Value::Object(map) => {
            for child in map.values() {
                collect_numeric_leaves(child, out);
            }
        }
        other => {
            if let Some(n) = json_number(other) {
                if !out.contains(&n) {
                    out.push(n);
                }
            }
        }
    }
}

/// Every numeric leaf of the raw tool output, numbers and numeric strings
/// alike. Failed calls contribute nothing.
pub fn numbers_from_tool_results(results: &[ToolResult]) -> Vec<f64> {
    let mut numbers = Vec::new();
    for result in results {
        if !result.success {
            continue;
        }
        if let Some(payload) = &result.result {
            collect_numeric_leaves(payload, &mut numbers);
        }
    }
    numbers
}

// ============================================================================
// Acceptance ladder
// ============================================================================

fn relative_close(a: f64, b: f64, tolerance: f64) -> bool {
    if a == b {
        return true;
    }
    if a == 0.0 || b == 0.0 {
        return (a - b).abs() < tolerance;
    }
    (a - b).abs() / a.abs().max(b.abs()) < tolerance
}

/// Small integers people write in prose without computing anything:
/// 1 through 10, then multiples of five up to 100.
fn is_prose_integer(value: f64) -> bool {
    if value.fract() != 0.0 {
        return false;
    }
    let n = value as i64;
    (1..=10).contains(&n) || ((11..=100).contains(&n) && n % 5 == 0)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Whether one answer number is traceable to the tool numbers.
fn is_accepted(value: f64, tool_numbers: &[f64]) -> bool {
    if is_prose_integer(value) {
        return true;
    }
    for &tool in tool_numbers {
        if relative_close(value, tool, tolerances::DIRECT_MATCH) {
            return true;
        }
        for decimals in 0..=2 {
            if relative_close(value, round_to(tool, decimals), tolerances::DERIVED_MATCH) {
                return true;
            }
        }
    }
    if !tool_numbers.is_empty() {
        let sum: f64 = tool_numbers.iter().sum();
        let avg = sum / tool_numbers.len() as f64;
        if relative_close(value, sum, tolerances::DERIVED_MATCH)
            || relative_close(value, avg, tolerances::DERIVED_MATCH)
        {
            return true;
        }
        let max = tool_numbers.iter().fold(f64::NEG_INFINITY, |m, &n| m.max(n));
        // Partial total: bigger than any single value but within the grand
        // total, e.g. "food plus drinks came to N".
        if value > max && value <= sum * tolerances::PARTIAL_TOTAL_CEILING {
            return true;
        }
    }
    false
}

/// A number worth blocking over: anything beyond trivial prose scale.
fn is_significant(value: f64) -> bool {
    value > 10.0 || (value > 0.0 && value < 1.0)
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a generated answer against the tool results that produced it.
pub fn validate_answer(answer: &str, tool_results: &[ToolResult]) -> ValidationReport {
    let numbers_in_answer = extract_numbers(answer);
    let numbers_from_tools = numbers_from_tool_results(tool_results);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Zero-row guard: every compute call came back empty, so any
    // significant number in the answer cannot be real.
    let compute_results: Vec<&ToolResult> = tool_results
        .iter()
        .filter(|r| r.is_compute() && r.success)
        .collect();
    let all_empty = !compute_results.is_empty()
        && compute_results.iter().all(|r| r.row_count() == Some(0));
    if all_empty {
        let significant: Vec<f64> = numbers_in_answer
            .iter()
            .copied()
            .filter(|&n| is_significant(n))
            .collect();
        if !significant.is_empty() {
            errors.push(format!(
                "invented numbers: queries returned zero rows but the answer contains {}",
                format_numbers(&significant)
            ));
            return ValidationReport {
                valid: false,
                errors,
                warnings,
                numbers_in_answer,
                numbers_from_tools: Vec::new(),
                invented_numbers: significant,
            };
        }
    }

    let invented_numbers: Vec<f64> = numbers_in_answer
        .iter()
        .copied()
        .filter(|&n| !is_accepted(n, &numbers_from_tools))
        .collect();
    if !invented_numbers.is_empty() {
        errors.push(format!(
            "invented numbers: {} cannot be traced to any tool result",
            format_numbers(&invented_numbers)
        ));
    }

    // Declared range rules per metric, independent of the text check.
    for result in tool_results {
        let (Some(name), Some(value)) = (result.metric_name.as_deref(), result.scalar_value())
        else {
            continue;
        };
        if let Some(template) = metrics::template(name) {
            for violation in template.rules.hard_violations(value) {
                errors.push(format!("{name}: {violation}"));
            }
            if let Some(warning) = template.rules.warning(value) {
                warnings.push(format!("{name}: {warning}"));
            }
        }
    }

    debug!(
        in_answer = numbers_in_answer.len(),
        from_tools = numbers_from_tools.len(),
        invented = invented_numbers.len(),
        "answer validated"
    );
    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
        numbers_in_answer,
        numbers_from_tools,
        invented_numbers,
    }
}

fn format_numbers(numbers: &[f64]) -> String {
    numbers
        .iter()
        .take(5)
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
