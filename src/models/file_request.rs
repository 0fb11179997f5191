use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The payload of a queue item: one file to be written to the remote store.
///
/// `metadata` is free-form producer context (source channel, speaker, tags)
/// carried through to the sink untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRequest {
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i64,
}

impl FileRequest {
    /// Deterministic idempotency key for callers that do not supply one.
    /// Logically-identical resubmissions (same name, directory, and creation
    /// time) collapse to the same key and therefore the same queue row.
    pub fn derive_idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.filename.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.directory.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Path of the file relative to the repository root.
    pub fn relative_path(&self) -> String {
        if self.directory.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.directory, self.filename)
        }
    }
}
