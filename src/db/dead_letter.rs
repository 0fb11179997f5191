use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::DeadLetterItem;

/// Quarantine one exhausted item: snapshot into dead_letter and delete the
/// active row, atomically. The item is in exactly one table at every point
/// an observer can see.
pub async fn move_to_dead_letter(pool: &SqlitePool, queue_id: i64) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let moved = sqlx::query(
        "INSERT INTO dead_letter (original_id, created_at, moved_at, retry_count, payload_json, last_error)
         SELECT id, created_at, ?, retry_count, payload_json,
                COALESCE(last_error, 'unknown error')
         FROM active_queue WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(queue_id)
    .execute(&mut *tx)
    .await?;

    if moved.rows_affected() == 0 {
        // Row vanished between selection and the move; nothing to quarantine.
        tx.rollback().await?;
        return Ok(());
    }

    sqlx::query("DELETE FROM active_queue WHERE id = ?")
        .bind(queue_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Most recently quarantined items, for operator inspection.
pub async fn list_recent(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<DeadLetterItem>, sqlx::Error> {
    sqlx::query_as::<_, DeadLetterItem>(
        "SELECT * FROM dead_letter ORDER BY moved_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
