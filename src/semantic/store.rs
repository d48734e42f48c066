//! Persistence for semantic mapping claims.
//!
//! One row per (dataset, physical column). The analytics gate is always
//! recomputed from live rows; there is no stored flag to go stale.

use deadpool_postgres::Pool;
use thiserror::Error;
use tokio_postgres::Row;
use tracing::{debug, info};

use super::{MappingStatus, SemanticMapping};
use crate::model::LogicalRole;

/// Errors from mapping persistence.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("stored row carries unknown logical role '{0}'")]
    UnknownRole(String),

    #[error("stored row carries unknown status '{0}'")]
    UnknownStatus(String),
}

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// DDL for the mapping table. Applied by the host application's migration
/// runner, kept here so the store and its schema evolve together.
pub const MAPPINGS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS semantic_column_mappings (
    dataset_id      BIGINT NOT NULL,
    physical_column TEXT NOT NULL,
    logical_role    TEXT NOT NULL,
    confidence      DOUBLE PRECISION NOT NULL,
    status          TEXT NOT NULL,
    auto_approved   BOOLEAN NOT NULL DEFAULT FALSE,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (dataset_id, physical_column)
);
CREATE INDEX IF NOT EXISTS semantic_column_mappings_role_idx
    ON semantic_column_mappings (dataset_id, logical_role);
"#;

/// Postgres-backed store for [`SemanticMapping`] rows.
pub struct MappingStore {
    pool: Pool,
}

impl MappingStore {
    pub fn new(pool: Pool) -> Self {
        MappingStore { pool }
    }

    /// Apply the store's DDL. Idempotent.
    pub async fn ensure_schema(&self) -> MappingResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(MAPPINGS_DDL).await?;
        Ok(())
    }

    /// Insert detection proposals. Rows the consultant already confirmed
    /// are never clobbered by a re-run of detection.
    pub async fn propose_mappings(&self, proposals: &[SemanticMapping]) -> MappingResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO semantic_column_mappings
                     (dataset_id, physical_column, logical_role, confidence, status, auto_approved)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (dataset_id, physical_column) DO UPDATE
                     SET logical_role = EXCLUDED.logical_role,
                         confidence = EXCLUDED.confidence,
                         status = EXCLUDED.status,
                         auto_approved = EXCLUDED.auto_approved,
                         updated_at = now()
                 WHERE semantic_column_mappings.status <> 'confirmed'",
            )
            .await?;
        for m in proposals {
            tx.execute(
                &stmt,
                &[
                    &m.dataset_id,
                    &m.physical_column,
                    &m.logical_role.as_str(),
                    &m.confidence,
                    &m.status.as_str(),
                    &m.auto_approved,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        debug!(count = proposals.len(), "mapping proposals stored");
        Ok(())
    }

    /// Confirm bindings, creating rows for previously unmapped columns.
    ///
    /// At most one confirmed mapping may exist per (dataset, role): any
    /// other column currently confirmed for the same role is demoted to
    /// rejected in the same transaction.
    pub async fn confirm_mappings(
        &self,
        dataset_id: i64,
        bindings: &[(String, LogicalRole, f64)],
    ) -> MappingResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let demote = tx
            .prepare(
                "UPDATE semantic_column_mappings
                 SET status = 'rejected', auto_approved = FALSE, updated_at = now()
                 WHERE dataset_id = $1 AND logical_role = $2
                   AND physical_column <> $3 AND status = 'confirmed'",
            )
            .await?;
        let upsert = tx
            .prepare(
                "INSERT INTO semantic_column_mappings
                     (dataset_id, physical_column, logical_role, confidence, status, auto_approved)
                 VALUES ($1, $2, $3, $4, 'confirmed', FALSE)
                 ON CONFLICT (dataset_id, physical_column) DO UPDATE
                     SET logical_role = EXCLUDED.logical_role,
                         confidence = EXCLUDED.confidence,
                         status = 'confirmed',
                         auto_approved = FALSE,
                         updated_at = now()",
            )
            .await?;
        for (column, role, confidence) in bindings {
            tx.execute(&demote, &[&dataset_id, &role.as_str(), column])
                .await?;
            tx.execute(&upsert, &[&dataset_id, column, &role.as_str(), confidence])
                .await?;
        }
        tx.commit().await?;
        info!(dataset_id, count = bindings.len(), "mappings confirmed");
        Ok(())
    }

    /// Reject one claim. If the claim was for a critical role and nothing
    /// else confirms that role, the next gate check comes back disabled.
    pub async fn reject_mapping(
        &self,
        dataset_id: i64,
        physical_column: &str,
    ) -> MappingResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE semantic_column_mappings
                 SET status = 'rejected', auto_approved = FALSE, updated_at = now()
                 WHERE dataset_id = $1 AND physical_column = $2",
                &[&dataset_id, &physical_column],
            )
            .await?;
        info!(dataset_id, physical_column, "mapping rejected");
        Ok(())
    }

    /// All claims for a dataset.
    pub async fn list_mappings(&self, dataset_id: i64) -> MappingResult<Vec<SemanticMapping>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT dataset_id, physical_column, logical_role, confidence, status, auto_approved
                 FROM semantic_column_mappings
                 WHERE dataset_id = $1
                 ORDER BY physical_column",
                &[&dataset_id],
            )
            .await?;
        rows.iter().map(row_to_mapping).collect()
    }

    /// Confirmed (role, column) bindings for a dataset.
    pub async fn confirmed_bindings(
        &self,
        dataset_id: i64,
    ) -> MappingResult<Vec<(LogicalRole, String)>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT logical_role, physical_column
                 FROM semantic_column_mappings
                 WHERE dataset_id = $1 AND status = 'confirmed'",
                &[&dataset_id],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let role_str: String = row.get(0);
                let role = LogicalRole::parse(&role_str)
                    .ok_or_else(|| MappingError::UnknownRole(role_str))?;
                Ok((role, row.get(1)))
            })
            .collect()
    }

    /// Physical column serving a role, following role aliases.
    pub async fn resolve_role(
        &self,
        dataset_id: i64,
        role: LogicalRole,
    ) -> MappingResult<Option<String>> {
        let bindings = self.confirmed_bindings(dataset_id).await?;
        Ok(super::resolve_with_aliases(role, &bindings).map(str::to_string))
    }

    /// Recompute the analytics gate from live rows.
    ///
    /// Disabled while any critical role has a pending claim, or has had its
    /// only claim rejected without a confirmed replacement.
    pub async fn check_analytics_enabled(&self, dataset_id: i64) -> MappingResult<bool> {
        let critical: Vec<String> = LogicalRole::ALL
            .iter()
            .filter(|r| r.is_critical())
            .map(|r| r.as_str().to_string())
            .collect();
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT
                   EXISTS (SELECT 1 FROM semantic_column_mappings
                           WHERE dataset_id = $1 AND status = 'pending'
                             AND logical_role = ANY($2)) AS has_pending,
                   EXISTS (SELECT 1 FROM semantic_column_mappings r
                           WHERE r.dataset_id = $1 AND r.status = 'rejected'
                             AND r.logical_role = ANY($2)
                             AND NOT EXISTS (SELECT 1 FROM semantic_column_mappings c
                                             WHERE c.dataset_id = r.dataset_id
                                               AND c.logical_role = r.logical_role
                                               AND c.status = 'confirmed')) AS has_unresolved",
                &[&dataset_id, &critical],
            )
            .await?;
        let has_pending: bool = row.get("has_pending");
        let has_unresolved: bool = row.get("has_unresolved");
        let enabled = !has_pending && !has_unresolved;
        debug!(dataset_id, enabled, "analytics gate recomputed");
        Ok(enabled)
    }

    /// Drop every claim for a dataset (dataset deleted or re-imported).
    pub async fn clear_dataset(&self, dataset_id: i64) -> MappingResult<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM semantic_column_mappings WHERE dataset_id = $1",
                &[&dataset_id],
            )
            .await?;
        Ok(deleted)
    }
}

fn row_to_mapping(row: &Row) -> MappingResult<SemanticMapping> {
    let role_str: String = row.get("logical_role");
    let role =
        LogicalRole::parse(&role_str).ok_or_else(|| MappingError::UnknownRole(role_str))?;
    let status_str: String = row.get("status");
    let status =
        MappingStatus::parse(&status_str).ok_or(MappingError::UnknownStatus(status_str))?;
    Ok(SemanticMapping {
        dataset_id: row.get("dataset_id"),
        physical_column: row.get("physical_column"),
        logical_role: role,
        confidence: row.get("confidence"),
        status,
        auto_approved: row.get("auto_approved"),
        is_critical: role.is_critical(),
    })
}
