//! The importer-facing data contract.
//!
//! Upstream ingestion samples each file in three windows (start, middle,
//! end) so type inference sees formatting drift that only appears deep in
//! the file. Everything downstream works off this sample plus the total row
//! count; full-table scans happen only in SQL.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Physical column type as materialized in the per-dataset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Text,
    Numeric,
    Integer,
    Date,
    Boolean,
}

impl DataType {
    /// Types that participate in SUM/AVG aggregation.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Numeric | DataType::Integer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Numeric => "NUMERIC",
            DataType::Integer => "INTEGER",
            DataType::Date => "DATE",
            DataType::Boolean => "BOOLEAN",
        }
    }
}

/// A row sample distributed across the source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedSample {
    /// Header row, in file order.
    pub columns: Vec<String>,
    /// Sampled rows; each row is positionally aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
    /// Row count of the full file, not of the sample.
    pub total_row_count: u64,
}

impl DistributedSample {
    /// Values of one column across the sample, as display strings.
    /// Nulls and empty cells are skipped.
    pub fn column_values(&self, column: &str) -> Vec<String> {
        let Some(idx) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(idx))
            .filter_map(|v| match v {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect()
    }

    /// Raw cell count for one column, nulls included.
    pub fn column_cell_count(&self, column: &str) -> usize {
        if self.columns.iter().any(|c| c == column) {
            self.rows.len()
        } else {
            0
        }
    }
}

/// A column paired with its sampled values, the classifier's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalColumn {
    pub name: String,
    pub inferred_type: Option<DataType>,
    pub sample_values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DistributedSample {
        DistributedSample {
            columns: vec!["prezzo".into(), "qta".into()],
            rows: vec![
                vec![json!("12,50"), json!(2)],
                vec![json!(null), json!(3)],
                vec![json!(""), json!(1)],
                vec![json!("8,00"), json!(null)],
            ],
            total_row_count: 120_000,
        }
    }

    #[test]
    fn column_values_skip_nulls_and_blanks() {
        let s = sample();
        assert_eq!(s.column_values("prezzo"), vec!["12,50", "8,00"]);
        assert_eq!(s.column_values("qta"), vec!["2", "3", "1"]);
        assert!(s.column_values("missing").is_empty());
    }

    #[test]
    fn total_row_count_is_independent_of_sample_size() {
        let s = sample();
        assert_eq!(s.rows.len(), 4);
        assert_eq!(s.total_row_count, 120_000);
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let s = sample();
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("totalRowCount").is_some());
    }
}
