use chrono::{DateTime, Utc};
use serde::Serialize;

/// A quarantined item. Rows here are terminal: nothing in this crate retries
/// out of dead_letter; requeueing is a manual operator action.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeadLetterItem {
    pub id: i64,
    pub original_id: i64,
    pub created_at: DateTime<Utc>,
    pub moved_at: DateTime<Utc>,
    pub retry_count: i64,
    pub payload_json: String,
    pub last_error: String,
}
