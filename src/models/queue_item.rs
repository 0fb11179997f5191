use chrono::{DateTime, Utc};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// A row in the active queue. The store is the sole source of truth for item
/// existence and status; the in-memory dispatch queue only carries ids.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub priority: i64,
    pub retry_count: i64,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub payload_json: String,
    pub last_error: Option<String>,
    pub batch_id: Option<i64>,
}
