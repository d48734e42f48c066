//! Background sweeper for the query result cache.
//!
//! Deletes expired rows and force-fails `computing` rows whose owner died
//! mid-flight, so waiters see an error instead of polling forever.

use std::time::Duration;

use deadpool_postgres::Pool;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A `computing` row older than this lost its owner and is force-failed.
pub const STUCK_COMPUTE: Duration = Duration::from_secs(300);

/// Periodic cache sweeper with an explicit lifecycle.
pub struct CacheJanitor {
    pool: Pool,
    sweep_interval: Duration,
    task: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl CacheJanitor {
    pub fn new(pool: Pool) -> Self {
        CacheJanitor {
            pool,
            sweep_interval: SWEEP_INTERVAL,
            task: None,
        }
    }

    /// Override the sweep cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Spawn the sweep loop. Calling `start` on a running janitor is a
    /// no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let pool = self.pool.clone();
        let interval = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so startup does not
            // race schema setup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = sweep(&pool).await {
                            error!(error = %err, "cache sweep failed");
                        }
                    }
                }
            }
        });
        self.task = Some((shutdown_tx, handle));
        info!(interval_secs = self.sweep_interval.as_secs(), "cache janitor started");
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(&mut self) {
        if let Some((shutdown_tx, handle)) = self.task.take() {
            let _ = shutdown_tx.send(());
            let _ = handle.await;
            info!("cache janitor stopped");
        }
    }
}

async fn sweep(pool: &Pool) -> Result<(), crate::cache::CacheError> {
    let client = pool.get().await?;

    let expired = client
        .execute(
            "DELETE FROM query_result_cache
             WHERE expires_at IS NOT NULL AND expires_at <= now()",
            &[],
        )
        .await?;

    let stuck = client
        .execute(
            "UPDATE query_result_cache
             SET status = 'error',
                 error_message = 'computation timed out',
                 compute_completed_at = now(),
                 expires_at = now()
             WHERE status = 'computing'
               AND compute_started_at <= now() - make_interval(secs => $1)",
            &[&(STUCK_COMPUTE.as_secs() as f64)],
        )
        .await?;

    if expired > 0 || stuck > 0 {
        debug!(expired, stuck, "cache sweep");
    }
    Ok(())
}
