//! Single-flight query result cache.
//!
//! Keyed by a hash of (SQL, params). The first caller to miss inserts a
//! `computing` row and runs the query; concurrent callers for the same key
//! either find the finished result or poll until the winner publishes it.
//! Coordination happens entirely through Postgres row locks
//! (`FOR UPDATE SKIP LOCKED` plus a unique constraint), so it stays correct
//! across multiple process instances with no in-process mutex.
//!
//! ```text
//!   caller A ──misses──> INSERT computing ──runs query──> ready/error
//!   caller B ──misses──> INSERT conflicts ──polls───────> same result
//! ```

mod janitor;
pub use janitor::CacheJanitor;

use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_postgres::Row;
use tracing::{debug, warn};

// ============================================================================
// Constants
// ============================================================================

/// TTLs per query class, in seconds.
pub mod ttl {
    pub const AGGREGATION_SECS: i64 = 3600;
    pub const FILTER_SECS: i64 = 300;
    pub const COMPARISON_SECS: i64 = 1800;
    pub const SCHEMA_SECS: i64 = 86_400;
    /// Errors are cached briefly so a hot failing query does not stampede.
    pub const ERROR_SECS: i64 = 300;
}

/// Polling budget for callers that lost the single-flight race.
pub mod wait {
    pub const MAX_ATTEMPTS: u32 = 20;
    pub const BASE_DELAY_MS: u64 = 250;
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("stored row carries unknown cache status '{0}'")]
    UnknownStatus(String),

    #[error("timed out waiting for concurrent computation after {attempts} attempts")]
    Timeout { attempts: u32 },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Lifecycle of a cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Computing,
    Ready,
    Error,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Computing => "computing",
            CacheStatus::Ready => "ready",
            CacheStatus::Error => "error",
        }
    }

    pub fn parse(text: &str) -> Option<CacheStatus> {
        match text {
            "computing" => Some(CacheStatus::Computing),
            "ready" => Some(CacheStatus::Ready),
            "error" => Some(CacheStatus::Error),
            _ => None,
        }
    }
}

/// What kind of query a result came from; decides how long it stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Aggregation,
    Filter,
    Comparison,
    Schema,
}

impl QueryClass {
    pub fn ttl_seconds(&self) -> i64 {
        match self {
            QueryClass::Aggregation => ttl::AGGREGATION_SECS,
            QueryClass::Filter => ttl::FILTER_SECS,
            QueryClass::Comparison => ttl::COMPARISON_SECS,
            QueryClass::Schema => ttl::SCHEMA_SECS,
        }
    }
}

/// A cache row as seen by callers.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub status: CacheStatus,
    pub result_json: Option<Value>,
    pub error_message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Linear backoff: attempt 1 waits one base delay, attempt 2 two, and so on.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(wait::BASE_DELAY_MS * attempt as u64)
}

// ============================================================================
// Manager
// ============================================================================

/// DDL for the cache table. The unique constraint is what makes the
/// single-flight insert race safe.
pub const CACHE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS query_result_cache (
    dataset_id           BIGINT NOT NULL,
    query_hash           TEXT NOT NULL,
    status               TEXT NOT NULL,
    result_json          JSONB,
    error_message        TEXT,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at           TIMESTAMPTZ,
    compute_started_at   TIMESTAMPTZ,
    compute_completed_at TIMESTAMPTZ,
    UNIQUE (dataset_id, query_hash)
);
CREATE INDEX IF NOT EXISTS query_result_cache_expiry_idx
    ON query_result_cache (expires_at);
"#;

/// Postgres-backed single-flight cache.
pub struct CacheManager {
    pool: Pool,
}

impl CacheManager {
    pub fn new(pool: Pool) -> Self {
        CacheManager { pool }
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Apply the cache DDL. Idempotent.
    pub async fn ensure_schema(&self) -> CacheResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(CACHE_DDL).await?;
        Ok(())
    }

    /// Fetch a finished, unexpired result. `computing` rows and expired
    /// rows are misses.
    pub async fn get_cached(
        &self,
        dataset_id: i64,
        query_hash: &str,
    ) -> CacheResult<Option<CachedEntry>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT status, result_json, error_message, expires_at
                 FROM query_result_cache
                 WHERE dataset_id = $1 AND query_hash = $2
                   AND status = 'ready'
                   AND (expires_at IS NULL OR expires_at > now())",
                &[&dataset_id, &query_hash],
            )
            .await?;
        row.map(row_to_entry).transpose()
    }

    /// Try to become the single flight for this key.
    ///
    /// Returns `true` when this caller must compute and publish the result.
    /// A live row held by someone else, a concurrent insert winning the
    /// unique-constraint race, or a fresh `ready` row all return `false`.
    pub async fn acquire_lock(&self, dataset_id: i64, query_hash: &str) -> CacheResult<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let existing = tx
            .query_opt(
                "SELECT status, expires_at
                 FROM query_result_cache
                 WHERE dataset_id = $1 AND query_hash = $2
                 FOR UPDATE SKIP LOCKED",
                &[&dataset_id, &query_hash],
            )
            .await?;

        let acquired = match existing {
            Some(row) => {
                let status_text: String = row.get(0);
                let status = CacheStatus::parse(&status_text)
                    .ok_or(CacheError::UnknownStatus(status_text))?;
                let expires_at: Option<DateTime<Utc>> = row.get(1);
                let expired = expires_at.is_some_and(|t| t <= Utc::now());
                // A dead row (error, or ready-but-expired) is re-armed by
                // whoever reaches it first; a live one belongs to its owner.
                if status == CacheStatus::Error || (status == CacheStatus::Ready && expired) {
                    tx.execute(
                        "UPDATE query_result_cache
                         SET status = 'computing',
                             result_json = NULL,
                             error_message = NULL,
                             compute_started_at = now(),
                             compute_completed_at = NULL,
                             expires_at = NULL
                         WHERE dataset_id = $1 AND query_hash = $2",
                        &[&dataset_id, &query_hash],
                    )
                    .await?;
                    true
                } else {
                    false
                }
            }
            None => {
                // Absent, or present but row-locked by a concurrent
                // acquirer (SKIP LOCKED hides it): the insert decides.
                let inserted = tx
                    .execute(
                        "INSERT INTO query_result_cache
                             (dataset_id, query_hash, status, compute_started_at)
                         VALUES ($1, $2, 'computing', now())
                         ON CONFLICT (dataset_id, query_hash) DO NOTHING",
                        &[&dataset_id, &query_hash],
                    )
                    .await?;
                inserted == 1
            }
        };

        tx.commit().await?;
        debug!(dataset_id, query_hash, acquired, "cache lock attempt");
        Ok(acquired)
    }

    /// Publish a successful result. Computing → Ready.
    pub async fn cache_result(
        &self,
        dataset_id: i64,
        query_hash: &str,
        result: &Value,
        class: QueryClass,
    ) -> CacheResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE query_result_cache
                 SET status = 'ready',
                     result_json = $3,
                     error_message = NULL,
                     compute_completed_at = now(),
                     expires_at = now() + make_interval(secs => $4)
                 WHERE dataset_id = $1 AND query_hash = $2",
                &[
                    &dataset_id,
                    &query_hash,
                    result,
                    &(class.ttl_seconds() as f64),
                ],
            )
            .await?;
        Ok(())
    }

    /// Publish a failure. Computing → Error, with a short TTL so the key
    /// can be retried once the error ages out.
    pub async fn cache_error(
        &self,
        dataset_id: i64,
        query_hash: &str,
        message: &str,
    ) -> CacheResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE query_result_cache
                 SET status = 'error',
                     error_message = $3,
                     compute_completed_at = now(),
                     expires_at = now() + make_interval(secs => $4)
                 WHERE dataset_id = $1 AND query_hash = $2",
                &[&dataset_id, &query_hash, &message, &(ttl::ERROR_SECS as f64)],
            )
            .await?;
        Ok(())
    }

    /// Poll until the single-flight winner publishes, with linear backoff.
    /// Exhausting the budget is a [`CacheError::Timeout`], never a hang.
    pub async fn wait_for_result(
        &self,
        dataset_id: i64,
        query_hash: &str,
    ) -> CacheResult<CachedEntry> {
        for attempt in 1..=wait::MAX_ATTEMPTS {
            tokio::time::sleep(backoff_delay(attempt)).await;

            let client = self.pool.get().await?;
            let row = client
                .query_opt(
                    "SELECT status, result_json, error_message, expires_at
                     FROM query_result_cache
                     WHERE dataset_id = $1 AND query_hash = $2",
                    &[&dataset_id, &query_hash],
                )
                .await?;

            match row {
                Some(row) => {
                    let entry = row_to_entry(row)?;
                    if entry.status != CacheStatus::Computing {
                        return Ok(entry);
                    }
                }
                // Row vanished (invalidation, janitor): stop waiting so the
                // caller can recompute.
                None => {
                    return Err(CacheError::Timeout { attempts: attempt });
                }
            }
        }
        warn!(dataset_id, query_hash, "cache wait budget exhausted");
        Err(CacheError::Timeout {
            attempts: wait::MAX_ATTEMPTS,
        })
    }

    /// Drop every cache row for a dataset. Called on re-import.
    pub async fn invalidate_dataset(&self, dataset_id: i64) -> CacheResult<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM query_result_cache WHERE dataset_id = $1",
                &[&dataset_id],
            )
            .await?;
        debug!(dataset_id, deleted, "cache invalidated");
        Ok(deleted)
    }
}

fn row_to_entry(row: Row) -> CacheResult<CachedEntry> {
    let status_text: String = row.get(0);
    let status =
        CacheStatus::parse(&status_text).ok_or(CacheError::UnknownStatus(status_text))?;
    Ok(CachedEntry {
        status,
        result_json: row.get(1),
        error_message: row.get(2),
        expires_at: row.get(3),
    })
}
