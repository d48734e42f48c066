//! Column discovery.
//!
//! Turns a [`DistributedSample`] into typed column definitions by stacking
//! evidence sources, strongest first:
//!
//! 1. the consultant's saved mapping for the exact header (short-circuits),
//! 2. a detected export template (filename keyword + column overlap),
//! 3. business-term name hints,
//! 4. a value-shape scan over the sampled cells,
//! 5. one batched [`ColumnIntel`] call for whatever is still uncertain.
//!
//! Intel may only raise confidence, never lower it, and its failure leaves
//! the heuristic result untouched. The whole dataset auto-confirms when the
//! mean column confidence clears [`thresholds::AUTO_CONFIRM_MEAN`].

pub mod hints;
pub mod patterns;
pub mod provider;

pub use provider::{
    ColumnIntel, ColumnIntelExt, IntelError, IntelQuery, IntelResult, IntelSuggestion, NoIntel,
};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{DataType, DistributedSample};
use hints::{detect_template, generate_display_name, name_hint, sanitize_column_name};
use patterns::detect_patterns;

// ============================================================================
// Thresholds
// ============================================================================

/// Named thresholds for the discovery pipeline.
pub mod thresholds {
    /// Mean column confidence at which the dataset auto-confirms.
    pub const AUTO_CONFIRM_MEAN: f64 = 0.85;
    /// Columns below this confidence are handed to the intel provider.
    pub const INTEL_CUTOFF: f64 = 0.85;
    /// Intel is skipped entirely when more than this share of columns is
    /// uncertain; a mostly-unknown file needs a human, not a model.
    pub const INTEL_MAX_SHARE: f64 = 0.5;
    /// Confidence granted to a consultant's saved mapping.
    pub const SAVED_MAPPING: f64 = 0.95;
    /// Name-hint results below this still get a value scan, which wins
    /// if it scores higher.
    pub const HINT_RESCAN_BELOW: f64 = 0.8;
    /// Sample values retained per column in the result.
    pub const SAMPLE_VALUES_KEPT: usize = 10;
}

/// Thresholds for per-column anomaly flags.
pub mod anomaly {
    /// Null/blank share above which the column is flagged.
    pub const NULL_RATIO: f64 = 0.5;
    /// Dirty-token share above which the column is flagged.
    pub const DIRTY_RATIO: f64 = 0.2;
    /// Minimum clean values before a constant column is worth flagging.
    pub const CONSTANT_MIN_VALUES: usize = 5;
}

// ============================================================================
// Types
// ============================================================================

/// A data-quality observation about one column's sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    ExcessNulls { ratio: f64 },
    DirtyValues { ratio: f64 },
    ConstantColumn,
    NegativeAmounts { count: usize },
}

/// One classified column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedColumn {
    pub original_name: String,
    /// Safe snake_case physical name for the generated table.
    pub suggested_name: String,
    pub display_name: String,
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: f64,
    /// Which evidence source decided the type, e.g. `TEMPLATE_DDTRIGHE`,
    /// `NAME_HINT`, `IMPORTO`, `INTEL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub sample_values: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub anomalies: Vec<Anomaly>,
}

/// A column definition the consultant confirmed on a previous import of the
/// same header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedColumn {
    pub suggested_name: String,
    pub data_type: DataType,
}

/// Outcome of discovery over one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub columns: Vec<ClassifiedColumn>,
    pub overall_confidence: f64,
    pub auto_confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_detected: Option<String>,
    pub intel_used: bool,
}

// ============================================================================
// Classifier
// ============================================================================

/// The column discovery engine. Stateless apart from the optional intel
/// provider; the same sample always classifies the same way.
pub struct ColumnClassifier {
    intel: Option<Arc<dyn ColumnIntel>>,
}

impl Default for ColumnClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnClassifier {
    pub fn new() -> Self {
        ColumnClassifier { intel: None }
    }

    pub fn with_intel(intel: Arc<dyn ColumnIntel>) -> Self {
        ColumnClassifier { intel: Some(intel) }
    }

    /// Classify every column of the sample.
    ///
    /// `saved` maps original header names to definitions the consultant
    /// confirmed on earlier imports; those short-circuit all heuristics.
    pub async fn discover_columns(
        &self,
        sample: &DistributedSample,
        filename: &str,
        saved: &HashMap<String, SavedColumn>,
    ) -> DiscoveryResult {
        let template = detect_template(filename, &sample.columns);
        if let Some(t) = template {
            debug!(template = t.name, filename, "export template detected");
        }

        let mut columns: Vec<ClassifiedColumn> = Vec::with_capacity(sample.columns.len());
        let mut uncertain: Vec<usize> = Vec::new();

        for name in &sample.columns {
            let values = sample.column_values(name);
            let cell_count = sample.column_cell_count(name);

            if let Some(prior) = saved.get(name) {
                columns.push(ClassifiedColumn {
                    original_name: name.clone(),
                    suggested_name: prior.suggested_name.clone(),
                    display_name: generate_display_name(&prior.suggested_name),
                    data_type: prior.data_type,
                    description: None,
                    confidence: thresholds::SAVED_MAPPING,
                    evidence: Some("SAVED_MAPPING".into()),
                    sample_values: values
                        .iter()
                        .take(thresholds::SAMPLE_VALUES_KEPT)
                        .cloned()
                        .collect(),
                    anomalies: Vec::new(),
                });
                continue;
            }

            let mut data_type = DataType::Text;
            let mut confidence = 0.5;
            let mut evidence: Option<String> = None;

            if let Some(ty) = template.and_then(|t| t.column_type(name)) {
                data_type = ty;
                confidence = hints::TEMPLATE_CONFIDENCE;
                evidence = Some(format!("TEMPLATE_{}", template.unwrap().name));
            }

            if evidence.is_none() {
                if let Some((ty, conf)) = name_hint(name) {
                    data_type = ty;
                    confidence = conf;
                    evidence = Some("NAME_HINT".into());
                }
            }

            let scan = detect_patterns(&values);
            if evidence.is_none() || confidence < thresholds::HINT_RESCAN_BELOW {
                if scan.confidence > confidence {
                    data_type = scan.data_type;
                    confidence = scan.confidence;
                    evidence = scan.pattern.map(str::to_string);
                }
            }

            let anomalies = detect_anomalies(name, &values, cell_count, scan.dirty_ratio, data_type);

            if confidence < thresholds::INTEL_CUTOFF {
                uncertain.push(columns.len());
            }

            columns.push(ClassifiedColumn {
                original_name: name.clone(),
                suggested_name: sanitize_column_name(name),
                display_name: generate_display_name(name),
                data_type,
                description: None,
                confidence,
                evidence,
                sample_values: values
                    .into_iter()
                    .take(thresholds::SAMPLE_VALUES_KEPT)
                    .collect(),
                anomalies,
            });
        }

        let intel_used = self
            .refine_uncertain(filename, &mut columns, &uncertain)
            .await;

        let overall_confidence = if columns.is_empty() {
            0.0
        } else {
            columns.iter().map(|c| c.confidence).sum::<f64>() / columns.len() as f64
        };
        let auto_confirmed = overall_confidence >= thresholds::AUTO_CONFIRM_MEAN;

        debug!(
            filename,
            columns = columns.len(),
            overall_confidence,
            auto_confirmed,
            intel_used,
            "column discovery complete"
        );

        DiscoveryResult {
            columns,
            overall_confidence,
            auto_confirmed,
            template_detected: template.map(|t| t.name.to_string()),
            intel_used,
        }
    }

    /// One batched intel call for the uncertain columns. Returns whether a
    /// suggestion was applied. Provider failure is logged and swallowed.
    async fn refine_uncertain(
        &self,
        filename: &str,
        columns: &mut [ClassifiedColumn],
        uncertain: &[usize],
    ) -> bool {
        let Some(intel) = &self.intel else {
            return false;
        };
        if uncertain.is_empty()
            || uncertain.len() as f64 > columns.len() as f64 * thresholds::INTEL_MAX_SHARE
        {
            return false;
        }

        let queries: Vec<IntelQuery> = uncertain
            .iter()
            .map(|&i| IntelQuery {
                column_name: columns[i].original_name.clone(),
                sample_values: columns[i].sample_values.clone(),
            })
            .collect();
        let floors: Vec<f64> = uncertain.iter().map(|&i| columns[i].confidence).collect();

        let suggestions = match intel.refine(filename, &queries, &floors).await {
            Ok(s) => s,
            Err(e) => {
                warn!(filename, error = %e, "column intel unavailable, keeping heuristics");
                return false;
            }
        };

        let mut applied = false;
        for suggestion in suggestions {
            let Some(col) = columns
                .iter_mut()
                .find(|c| c.original_name == suggestion.column_name)
            else {
                continue;
            };
            col.data_type = suggestion.data_type;
            col.confidence = suggestion.confidence;
            col.evidence = Some("INTEL".into());
            if let Some(name) = suggestion.suggested_name {
                col.suggested_name = name;
            }
            if let Some(display) = suggestion.display_name {
                col.display_name = display;
            }
            col.description = suggestion.description;
            applied = true;
        }
        applied
    }
}

const AMOUNT_TERMS: [&str; 8] = [
    "prezzo", "price", "importo", "amount", "costo", "cost", "totale", "total",
];

fn detect_anomalies(
    name: &str,
    values: &[String],
    cell_count: usize,
    dirty_ratio: f64,
    data_type: DataType,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if cell_count > 0 {
        let null_ratio = (cell_count - values.len()) as f64 / cell_count as f64;
        if null_ratio > anomaly::NULL_RATIO {
            anomalies.push(Anomaly::ExcessNulls { ratio: null_ratio });
        }
    }

    if dirty_ratio > anomaly::DIRTY_RATIO {
        anomalies.push(Anomaly::DirtyValues { ratio: dirty_ratio });
    }

    if values.len() >= anomaly::CONSTANT_MIN_VALUES
        && values.windows(2).all(|w| w[0] == w[1])
    {
        anomalies.push(Anomaly::ConstantColumn);
    }

    if data_type.is_numeric() {
        let lower = name.to_lowercase();
        if AMOUNT_TERMS.iter().any(|t| lower.contains(t)) {
            let negatives = values.iter().filter(|v| v.trim_start().starts_with('-')).count();
            if negatives > 0 {
                anomalies.push(Anomaly::NegativeAmounts { count: negatives });
            }
        }
    }

    anomalies
}
