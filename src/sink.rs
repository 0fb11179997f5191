use async_trait::async_trait;
use serde_json::json;

use crate::models::FileRequest;

#[derive(Debug)]
pub struct SinkError {
    pub message: String,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for SinkError {
    fn from(s: String) -> Self {
        SinkError { message: s }
    }
}

impl From<&str> for SinkError {
    fn from(s: &str) -> Self {
        SinkError {
            message: s.to_string(),
        }
    }
}

/// The remote write side of the pipeline. The real implementation (Git-backed
/// remote store, authentication, rate-limit handling) lives outside this
/// crate and is injected into the processor; a batch is one unit of
/// success or failure from this crate's point of view.
///
/// Implementations are treated as stateless here: the only thing crossing
/// this boundary is the batch payload.
#[async_trait]
pub trait SinkAdapter: Send + Sync {
    /// Called once during processor initialization, before any batch is
    /// dispatched. Covers remote authentication and connectivity checks.
    async fn initialize(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Write one batch to the remote store. An `Err` fails every item in the
    /// batch; commit-level idempotency on the remote side is the
    /// implementation's responsibility.
    async fn process_batch(&self, items: &[FileRequest]) -> Result<(), SinkError>;

    /// Remote-side status for observability pass-through.
    async fn repository_status(&self) -> serde_json::Value {
        json!({})
    }
}

/// Development sink: logs every batch and accepts it. Useful for running the
/// daemon without remote credentials and as the default wiring in `main`.
pub struct LoggingSink;

#[async_trait]
impl SinkAdapter for LoggingSink {
    async fn process_batch(&self, items: &[FileRequest]) -> Result<(), SinkError> {
        for item in items {
            tracing::info!(
                "Would write {} ({} bytes)",
                item.relative_path(),
                item.content.len()
            );
        }
        Ok(())
    }

    async fn repository_status(&self) -> serde_json::Value {
        json!({ "kind": "logging", "connected": true })
    }
}
