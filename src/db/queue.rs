use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::queue_item::{
    QueueItem, STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING, STATUS_PROCESSING,
};

/// Result of an insert attempt. `deduplicated` is true when the idempotency
/// key already existed and the original row's id was returned instead.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueOutcome {
    pub id: i64,
    pub deduplicated: bool,
}

/// Aggregate row counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Insert a new item, resolving a duplicate idempotency key to the existing
/// row's id instead of erroring.
pub async fn enqueue(
    pool: &SqlitePool,
    idempotency_key: &str,
    payload_json: &str,
    priority: i64,
    created_at: DateTime<Utc>,
) -> Result<EnqueueOutcome, sqlx::Error> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO active_queue (created_at, updated_at, priority, status, idempotency_key, payload_json)
         VALUES (?, ?, ?, 'pending', ?, ?)
         ON CONFLICT(idempotency_key) DO NOTHING
         RETURNING id",
    )
    .bind(created_at)
    .bind(Utc::now())
    .bind(priority)
    .bind(idempotency_key)
    .bind(payload_json)
    .fetch_optional(pool)
    .await?;

    if let Some((id,)) = inserted {
        return Ok(EnqueueOutcome {
            id,
            deduplicated: false,
        });
    }

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM active_queue WHERE idempotency_key = ?")
        .bind(idempotency_key)
        .fetch_one(pool)
        .await?;

    Ok(EnqueueOutcome {
        id,
        deduplicated: true,
    })
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM active_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Bulk-load rows by id, filtered to those still pending. Ids that were
/// completed, dead-lettered, or claimed since they were dispatched simply
/// drop out of the result.
pub async fn load_pending(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<QueueItem>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let query = format!(
        "SELECT * FROM active_queue
         WHERE id IN ({}) AND status = '{STATUS_PENDING}'
         ORDER BY priority DESC, created_at ASC",
        placeholders(ids.len())
    );

    let mut q = sqlx::query_as::<_, QueueItem>(&query);
    for id in ids {
        q = q.bind(id);
    }
    q.fetch_all(pool).await
}

/// Ids of pending rows in dispatch order, for the recovery load and manual
/// sweeps.
pub async fn pending_ids(pool: &SqlitePool, limit: i64) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM active_queue
         WHERE status = 'pending'
         ORDER BY priority DESC, created_at ASC
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Claim rows for a batch: pending -> processing, stamped with the batch id.
pub async fn mark_processing(
    pool: &SqlitePool,
    ids: &[i64],
    batch_id: i64,
) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }

    let query = format!(
        "UPDATE active_queue
         SET status = '{STATUS_PROCESSING}', batch_id = ?, updated_at = ?
         WHERE id IN ({}) AND status = '{STATUS_PENDING}'",
        placeholders(ids.len())
    );

    let mut q = sqlx::query(&query).bind(batch_id).bind(Utc::now());
    for id in ids {
        q = q.bind(id);
    }
    q.execute(pool).await?;
    Ok(())
}

pub async fn mark_completed(pool: &SqlitePool, ids: &[i64]) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }

    let query = format!(
        "UPDATE active_queue
         SET status = '{STATUS_COMPLETED}', updated_at = ?
         WHERE id IN ({})",
        placeholders(ids.len())
    );

    let mut q = sqlx::query(&query).bind(Utc::now());
    for id in ids {
        q = q.bind(id);
    }
    q.execute(pool).await?;
    Ok(())
}

/// Terminal failure with no retry. Reserved for defects (undeserializable
/// payloads), never for transient sink errors.
pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE active_queue
         SET status = 'failed', last_error = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(error)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// First pass of the failure handler: bump retry counters, record the error,
/// and make the rows eligible for another attempt.
pub async fn record_failure(
    pool: &SqlitePool,
    ids: &[i64],
    error: &str,
) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }

    let query = format!(
        "UPDATE active_queue
         SET retry_count = retry_count + 1, last_error = ?,
             status = '{STATUS_PENDING}', updated_at = ?
         WHERE id IN ({})",
        placeholders(ids.len())
    );

    let mut q = sqlx::query(&query).bind(error).bind(Utc::now());
    for id in ids {
        q = q.bind(id);
    }
    q.execute(pool).await?;
    Ok(())
}

/// Rows from the given id set whose retry budget is spent.
pub async fn exhausted(
    pool: &SqlitePool,
    ids: &[i64],
    max_retry_count: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let query = format!(
        "SELECT * FROM active_queue
         WHERE retry_count >= ? AND id IN ({})",
        placeholders(ids.len())
    );

    let mut q = sqlx::query_as::<_, QueueItem>(&query).bind(max_retry_count);
    for id in ids {
        q = q.bind(id);
    }
    q.fetch_all(pool).await
}

/// Reset processing rows orphaned by an unclean shutdown. A row is orphaned
/// when its updated_at predates the stuck threshold; younger processing rows
/// belong to a batch that may still be in flight.
pub async fn reset_stuck(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE active_queue
         SET status = 'pending', updated_at = ?
         WHERE status = 'processing' AND updated_at < ?",
    )
    .bind(Utc::now())
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn status_counts(pool: &SqlitePool) -> Result<StatusCounts, sqlx::Error> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM active_queue GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match status.as_str() {
            STATUS_PENDING => counts.pending = count,
            STATUS_PROCESSING => counts.processing = count,
            STATUS_COMPLETED => counts.completed = count,
            STATUS_FAILED => counts.failed = count,
            _ => {}
        }
    }
    Ok(counts)
}

/// Retention cleanup of completed rows. Not required for correctness; keeps
/// the store from growing without bound.
pub async fn cleanup_completed(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM active_queue WHERE status = 'completed' AND updated_at < ?")
            .bind(older_than)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}

fn placeholders(count: usize) -> String {
    let mut s = String::with_capacity(count * 3);
    for i in 0..count {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}
