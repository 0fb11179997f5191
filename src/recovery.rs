use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;

use crate::config::QueueConfig;
use crate::db;
use crate::dispatch::DispatchQueue;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Processing rows orphaned by a crash and reset to pending.
    pub reset: u64,
    /// Pending ids pushed onto the dispatch queue.
    pub loaded: usize,
}

/// Startup recovery, run once before the processing loop starts.
///
/// Step 1 reclaims rows stuck in 'processing' from a prior unclean shutdown.
/// Step 2 rebuilds the dispatch queue from the store, in priority order.
/// Rows beyond the queue capacity stay durably pending; they remain visible
/// to status queries and are picked up by later sweeps.
pub async fn run(
    pool: &SqlitePool,
    dispatch: &DispatchQueue,
    config: &QueueConfig,
) -> Result<RecoveryReport, sqlx::Error> {
    let threshold = ChronoDuration::from_std(config.stuck_processing_threshold)
        .unwrap_or_else(|_| ChronoDuration::seconds(300));
    let cutoff = Utc::now() - threshold;

    let reset = db::queue::reset_stuck(pool, cutoff).await?;
    if reset > 0 {
        tracing::warn!("Recovered {reset} items stuck in processing from a previous run");
    }

    let ids = db::queue::pending_ids(pool, config.max_queue_size as i64).await?;
    let mut loaded = 0;
    for id in ids {
        if dispatch.try_push(id) {
            loaded += 1;
        } else {
            break;
        }
    }

    tracing::info!("Recovery complete: {reset} reset, {loaded} queued for dispatch");

    Ok(RecoveryReport { reset, loaded })
}
