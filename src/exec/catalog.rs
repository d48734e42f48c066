//! Dataset-to-table resolution.
//!
//! Each imported dataset lives in its own materialized Postgres table,
//! created by an external staging-swap import and read-only afterwards.
//! The naming scheme belongs to the host application, so the executor only
//! sees it through the [`TableCatalog`] capability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::exec::{ExecError, ExecResult};
use crate::model::DataType;

/// Columns the import layer adds to every dataset table. They are not part
/// of the user schema and never appear in tool results.
pub const RESERVED_COLUMNS: [&str; 5] = [
    "id",
    "riga_originale",
    "consultant_id",
    "client_id",
    "created_at",
];

/// The resolved physical home of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetTable {
    pub dataset_id: i64,
    pub table_name: String,
    /// User columns, in import order. Reserved columns excluded.
    pub columns: Vec<String>,
    pub column_types: HashMap<String, DataType>,
    pub row_count: u64,
}

impl DatasetTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_type(&self, name: &str) -> Option<DataType> {
        self.column_types.get(name).copied()
    }
}

/// Where datasets are found. Injected so the engine never hard-codes the
/// host's table naming scheme.
#[async_trait]
pub trait TableCatalog: Send + Sync {
    async fn resolve(&self, dataset_id: i64) -> ExecResult<DatasetTable>;
}

/// Convenience layer over [`TableCatalog`].
#[async_trait]
pub trait TableCatalogExt: TableCatalog {
    /// Resolve and check a set of referenced columns in one shot; unknown
    /// columns are a [`ExecError::UnknownColumn`], never auto-corrected.
    async fn resolve_checked(
        &self,
        dataset_id: i64,
        referenced: &[String],
    ) -> ExecResult<DatasetTable> {
        let table = self.resolve(dataset_id).await?;
        for column in referenced {
            if !table.has_column(column) {
                return Err(ExecError::UnknownColumn {
                    column: column.clone(),
                });
            }
        }
        Ok(table)
    }
}

#[async_trait]
impl<T: TableCatalog + ?Sized> TableCatalogExt for T {}

/// In-memory catalog for tests and single-process embedding.
#[derive(Default)]
pub struct StaticCatalog {
    tables: RwLock<HashMap<i64, DatasetTable>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, table: DatasetTable) {
        self.tables.write().await.insert(table.dataset_id, table);
    }
}

#[async_trait]
impl TableCatalog for StaticCatalog {
    async fn resolve(&self, dataset_id: i64) -> ExecResult<DatasetTable> {
        self.tables
            .read()
            .await
            .get(&dataset_id)
            .cloned()
            .ok_or(ExecError::DatasetNotReady { dataset_id })
    }
}

/// Shared handle alias used across the executor.
pub type CatalogRef = Arc<dyn TableCatalog>;
