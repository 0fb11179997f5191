use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::db;
use crate::error::AppError;
use crate::memory;
use crate::models::FileRequest;
use crate::processor::{emit_progress, ProcessorShared};

/// The processing loop: single background worker, one batch in flight at a
/// time. Errors inside an iteration are logged and routed through the
/// failure path; only the shutdown signal stops the loop.
pub(crate) async fn run(shared: Arc<ProcessorShared>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("Processing loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let max = effective_batch_size(&shared);

        // The batch-collection wait doubles as the cooperative shutdown
        // check point: a signal mid-wait drops the collection future and
        // any already-popped id stays durably pending in the store.
        let ids = tokio::select! {
            ids = shared
                .dispatch
                .collect_batch(shared.config.batch_timeout, max) => ids,
            _ = shutdown.changed() => break,
        };

        if ids.is_empty() {
            continue;
        }

        if let Err(e) = process_batch(&shared, &ids).await {
            tracing::error!("Batch processing error for ids {ids:?}: {e}");
        }

        emit_progress(&shared).await;
    }

    tracing::debug!("Processing loop stopped");
}

/// Batch size for this iteration, shrunk under memory pressure. There is no
/// collector to poke; sending smaller batches is what actually sheds load.
fn effective_batch_size(shared: &ProcessorShared) -> usize {
    let stats = memory::sample();
    if stats.rss_mb > shared.config.memory_limit_mb {
        let reduced = (shared.config.batch_size / 2).max(1);
        tracing::warn!(
            "Memory pressure ({} MB > {} MB limit), batch size reduced to {reduced}",
            stats.rss_mb,
            shared.config.memory_limit_mb
        );
        reduced
    } else {
        shared.config.batch_size
    }
}

async fn process_batch(shared: &ProcessorShared, ids: &[i64]) -> Result<(), AppError> {
    let rows = db::queue::load_pending(&shared.pool, ids).await?;
    if rows.is_empty() {
        return Ok(());
    }

    // Payload corruption is a defect, not a transient condition: such rows
    // go straight to 'failed' and never reach the sink or a retry.
    let mut dispatched = Vec::with_capacity(rows.len());
    let mut requests: Vec<FileRequest> = Vec::with_capacity(rows.len());
    for row in &rows {
        match serde_json::from_str::<FileRequest>(&row.payload_json) {
            Ok(request) => {
                dispatched.push(row.id);
                requests.push(request);
            }
            Err(e) => {
                tracing::error!("Item {} has undeserializable payload, failing it: {e}", row.id);
                db::queue::mark_failed(&shared.pool, row.id, &format!("corrupt payload: {e}"))
                    .await?;
                shared.stats.items_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if dispatched.is_empty() {
        return Ok(());
    }

    let batch_id = Utc::now().timestamp_millis();
    db::queue::mark_processing(&shared.pool, &dispatched, batch_id).await?;
    shared.stats.batches_dispatched.fetch_add(1, Ordering::Relaxed);

    tracing::debug!("Dispatching batch {batch_id} with {} items", dispatched.len());

    match shared.sink.process_batch(&requests).await {
        Ok(()) => {
            db::queue::mark_completed(&shared.pool, &dispatched).await?;
            shared
                .stats
                .items_completed
                .fetch_add(dispatched.len() as u64, Ordering::Relaxed);
            tracing::info!("Batch {batch_id} completed ({} items)", dispatched.len());
            Ok(())
        }
        Err(e) => {
            tracing::warn!("Batch {batch_id} failed: {e}");
            handle_batch_failure(shared, &dispatched, &e.message).await
        }
    }
}

/// Failure policy for a failed batch: every item gets another chance until
/// its retry budget is spent, then it is quarantined in dead_letter.
async fn handle_batch_failure(
    shared: &ProcessorShared,
    ids: &[i64],
    error: &str,
) -> Result<(), AppError> {
    db::queue::record_failure(&shared.pool, ids, error).await?;

    let exhausted = db::queue::exhausted(&shared.pool, ids, shared.config.max_retry_count).await?;
    let mut quarantined: HashSet<i64> = HashSet::with_capacity(exhausted.len());
    for item in &exhausted {
        tracing::error!(
            "Item {} exhausted {} retries, moving to dead letter: {error}",
            item.id,
            item.retry_count
        );
        db::dead_letter::move_to_dead_letter(&shared.pool, item.id).await?;
        quarantined.insert(item.id);
        shared.stats.items_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    // Survivors are retried promptly rather than waiting for the next sweep.
    for id in ids {
        if !quarantined.contains(id) {
            shared.dispatch.try_push(*id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::config::QueueConfig;
    use crate::dispatch::DispatchQueue;
    use crate::models::FileRequest;
    use crate::processor::Stats;
    use crate::sink::{SinkAdapter, SinkError};

    struct NullSink;

    #[async_trait]
    impl SinkAdapter for NullSink {
        async fn process_batch(&self, _items: &[FileRequest]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    async fn shared_with_max_retry(max_retry_count: i64) -> Arc<ProcessorShared> {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        Arc::new(ProcessorShared {
            pool,
            dispatch: DispatchQueue::new(10),
            sink: Arc::new(NullSink),
            config: QueueConfig {
                batch_size: 10,
                batch_timeout: Duration::from_millis(100),
                max_queue_size: 10,
                max_retry_count,
                stuck_processing_threshold: Duration::from_secs(300),
                memory_limit_mb: u64::MAX / (1024 * 1024),
            },
            stats: Stats::default(),
            progress: StdMutex::new(None),
        })
    }

    async fn insert_item(shared: &ProcessorShared) -> i64 {
        let request = FileRequest {
            filename: "note.md".to_string(),
            content: "hello".to_string(),
            directory: String::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            priority: 0,
        };
        let payload = serde_json::to_string(&request).unwrap();
        db::queue::enqueue(&shared.pool, "key-1", &payload, 0, request.created_at)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn failures_below_budget_keep_item_pending() {
        let shared = shared_with_max_retry(3).await;
        let id = insert_item(&shared).await;

        handle_batch_failure(&shared, &[id], "sink down").await.unwrap();
        handle_batch_failure(&shared, &[id], "sink down").await.unwrap();

        let row = db::queue::find_by_id(&shared.pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.last_error.as_deref(), Some("sink down"));
        assert_eq!(db::dead_letter::count(&shared.pool).await.unwrap(), 0);

        // The item was re-queued for a prompt retry, twice.
        let ids = shared
            .dispatch
            .collect_batch(Duration::from_millis(10), 10)
            .await;
        assert_eq!(ids, vec![id, id]);
    }

    #[tokio::test]
    async fn failure_at_budget_quarantines_atomically() {
        let shared = shared_with_max_retry(3).await;
        let id = insert_item(&shared).await;

        for _ in 0..3 {
            handle_batch_failure(&shared, &[id], "sink down").await.unwrap();
        }

        assert!(db::queue::find_by_id(&shared.pool, id).await.unwrap().is_none());

        let dead = db::dead_letter::list_recent(&shared.pool, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].original_id, id);
        assert_eq!(dead[0].retry_count, 3);
        assert_eq!(dead[0].last_error, "sink down");
        assert_eq!(
            shared.stats.items_dead_lettered.load(Ordering::Relaxed),
            1
        );
    }
}
