//! ColumnIntel trait definition.
//!
//! Abstracts the external model that refines low-confidence column
//! classifications. The engine never talks to a provider directly; it hands
//! a batch of unresolved columns to whatever implements this trait and
//! treats any failure as "no refinement available".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::DataType;

/// Errors surfaced by an intel provider. All of them are non-fatal to
/// discovery; the caller logs and keeps its heuristic result.
#[derive(Debug, Error)]
pub enum IntelError {
    #[error("no intel provider configured")]
    Unavailable,

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("provider returned malformed output: {0}")]
    Malformed(String),
}

/// Result type for intel operations.
pub type IntelResult<T> = Result<T, IntelError>;

/// One column the heuristics could not classify confidently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelQuery {
    pub column_name: String,
    pub sample_values: Vec<String>,
}

/// A provider's judgement for one queried column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelSuggestion {
    pub column_name: String,
    pub data_type: DataType,
    pub confidence: f64,
    pub suggested_name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// Trait for batched column-classification refinement.
#[async_trait]
pub trait ColumnIntel: Send + Sync {
    /// Classify a batch of columns in one provider call.
    ///
    /// `filename` gives the provider file-level context (export name,
    /// period). Returned suggestions may cover any subset of the queries.
    async fn classify_batch(
        &self,
        filename: &str,
        queries: &[IntelQuery],
    ) -> IntelResult<Vec<IntelSuggestion>>;
}

/// Extension trait applying the raise-only contract: a suggestion is kept
/// only when it is MORE confident than the heuristic it would replace.
#[async_trait]
pub trait ColumnIntelExt: ColumnIntel {
    /// Run the batch and drop every suggestion at or below its floor.
    ///
    /// `floors` is positionally aligned with `queries` and carries the
    /// heuristic confidence each suggestion must beat.
    async fn refine(
        &self,
        filename: &str,
        queries: &[IntelQuery],
        floors: &[f64],
    ) -> IntelResult<Vec<IntelSuggestion>> {
        let suggestions = self.classify_batch(filename, queries).await?;
        Ok(suggestions
            .into_iter()
            .filter(|s| {
                queries
                    .iter()
                    .position(|q| q.column_name == s.column_name)
                    .map(|i| s.confidence > floors[i])
                    .unwrap_or(false)
            })
            .collect())
    }
}

impl<T: ColumnIntel + ?Sized> ColumnIntelExt for T {}

/// Provider used when no external model is configured.
pub struct NoIntel;

#[async_trait]
impl ColumnIntel for NoIntel {
    async fn classify_batch(
        &self,
        _filename: &str,
        _queries: &[IntelQuery],
    ) -> IntelResult<Vec<IntelSuggestion>> {
        Err(IntelError::Unavailable)
    }
}
