use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::db;
use crate::dispatch::DispatchQueue;
use crate::error::{AppError, InitStage};
use crate::memory::{self, MemoryStats};
use crate::models::{DeadLetterItem, FileRequest};
use crate::recovery;
use crate::sink::SinkAdapter;
use crate::worker;

/// Bounded wait for the loop to observe a cancel before it is force-aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on how long a manual flush polls for the queue to drain.
const MANUAL_FLUSH_DEADLINE: Duration = Duration::from_secs(10);

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\\\x00]+$").expect("valid filename regex"));

pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStatusReport {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub in_memory_depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStatus {
    pub initialized: bool,
    pub active: bool,
    pub queue: QueueStatusReport,
    pub stats: StatsSnapshot,
    pub repository: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub batches_dispatched: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_dead_lettered: u64,
}

/// Outcome of a manual one-shot flush. Partial success is reported through
/// the counts rather than an error.
#[derive(Debug, Clone, Serialize)]
pub struct ManualFlushReport {
    pub success: bool,
    pub files_processed: i64,
    pub remaining_pending: i64,
    pub completed: i64,
    pub failed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EnqueueReceipt {
    pub id: i64,
    pub deduplicated: bool,
}

#[derive(Default)]
pub(crate) struct Stats {
    pub batches_dispatched: AtomicU64,
    pub items_completed: AtomicU64,
    pub items_failed: AtomicU64,
    pub items_dead_lettered: AtomicU64,
}

impl Stats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_dead_lettered: self.items_dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Everything the processing loop shares with the orchestration layer.
pub(crate) struct ProcessorShared {
    pub pool: SqlitePool,
    pub dispatch: DispatchQueue,
    pub sink: Arc<dyn SinkAdapter>,
    pub config: QueueConfig,
    pub stats: Stats,
    pub progress: StdMutex<Option<ProgressCallback>>,
}

/// Report the current queue counts and memory to the caller-supplied
/// progress callback, if one is installed.
pub(crate) async fn emit_progress(shared: &ProcessorShared) {
    let callback = {
        let guard = shared.progress.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    };
    let Some(callback) = callback else {
        return;
    };

    let counts = match db::queue::status_counts(&shared.pool).await {
        Ok(counts) => counts,
        Err(e) => {
            tracing::debug!("Progress snapshot skipped, count query failed: {e}");
            return;
        }
    };
    let dead_letter = db::dead_letter::count(&shared.pool).await.unwrap_or(0);

    callback(ProgressSnapshot {
        pending: counts.pending,
        processing: counts.processing,
        completed: counts.completed,
        failed: counts.failed,
        dead_letter,
        memory: memory::sample(),
    });
}

/// Orchestrates the durable store, dispatch queue, and sink adapter:
/// lifecycle, manual triggering, cancellation, and status reporting.
///
/// One processing loop runs at a time; enqueue and status calls are safe
/// from any number of concurrent tasks.
pub struct BatchProcessor {
    shared: Arc<ProcessorShared>,
    initialized: AtomicBool,
    handle: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl BatchProcessor {
    pub fn new(pool: SqlitePool, config: QueueConfig, sink: Arc<dyn SinkAdapter>) -> Self {
        let dispatch = DispatchQueue::new(config.max_queue_size);
        BatchProcessor {
            shared: Arc::new(ProcessorShared {
                pool,
                dispatch,
                sink,
                config,
                stats: Stats::default(),
                progress: StdMutex::new(None),
            }),
            initialized: AtomicBool::new(false),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Chain dependency startup: sink (remote auth) -> store -> recovery.
    /// Idempotent; a failure at any stage leaves the subsystem not started.
    pub async fn initialize(&self) -> Result<(), AppError> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.shared
            .sink
            .initialize()
            .await
            .map_err(|e| AppError::Init {
                stage: InitStage::Sink,
                message: e.message,
            })?;

        db::queue::status_counts(&self.shared.pool)
            .await
            .map_err(|e| AppError::Init {
                stage: InitStage::Store,
                message: e.to_string(),
            })?;

        recovery::run(&self.shared.pool, &self.shared.dispatch, &self.shared.config)
            .await
            .map_err(|e| AppError::Init {
                stage: InitStage::Recovery,
                message: e.to_string(),
            })?;

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!("Batch processor initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start the background loop. Returns false if it is already running.
    pub async fn start(&self) -> bool {
        let mut guard = self.handle.lock().await;
        if let Some((_, handle)) = guard.as_ref() {
            if !handle.is_finished() {
                return false;
            }
        }

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(worker::run(self.shared.clone(), rx));
        *guard = Some((tx, task));
        tracing::info!("Batch processing started");
        true
    }

    /// Stop the background loop. Graceful stop waits for the current batch
    /// to finish; non-graceful aborts the task outright.
    pub async fn stop(&self, graceful: bool) {
        let mut guard = self.handle.lock().await;
        let Some((shutdown, task)) = guard.take() else {
            return;
        };

        let _ = shutdown.send(true);
        if graceful {
            let _ = task.await;
        } else {
            task.abort();
            let _ = task.await;
        }
        tracing::info!("Batch processing stopped (graceful={graceful})");
    }

    /// Cooperative cancel: signal the loop, wait a bounded grace period for
    /// it to observe the flag, then force-abort.
    pub async fn cancel(&self) {
        let mut guard = self.handle.lock().await;
        let Some((shutdown, mut task)) = guard.take() else {
            return;
        };

        let _ = shutdown.send(true);
        match tokio::time::timeout(CANCEL_GRACE, &mut task).await {
            Ok(_) => tracing::info!("Batch processing cancelled"),
            Err(_) => {
                tracing::warn!("Processing loop ignored cancel for {CANCEL_GRACE:?}, aborting");
                task.abort();
                let _ = task.await;
            }
        }
    }

    pub async fn is_active(&self) -> bool {
        let guard = self.handle.lock().await;
        matches!(guard.as_ref(), Some((_, handle)) if !handle.is_finished())
    }

    /// Durably record one file write. The caller may supply an idempotency
    /// key; otherwise one is derived from the request so that identical
    /// resubmissions (a retried chat interaction, a replayed transcript)
    /// collapse to the original row and id.
    ///
    /// Never blocks on dispatch-queue saturation: the row always exists in
    /// the store and is picked up by a later sweep if the push is dropped.
    pub async fn enqueue(
        &self,
        request: FileRequest,
        idempotency_key: Option<String>,
    ) -> Result<EnqueueReceipt, AppError> {
        let request = normalize(request)?;
        let key = idempotency_key.unwrap_or_else(|| request.derive_idempotency_key());
        let payload = serde_json::to_string(&request)?;

        let outcome = db::queue::enqueue(
            &self.shared.pool,
            &key,
            &payload,
            request.priority,
            request.created_at,
        )
        .await?;

        if outcome.deduplicated {
            tracing::debug!("Enqueue deduplicated to existing item {}", outcome.id);
        } else {
            self.shared.dispatch.try_push(outcome.id);
        }

        Ok(EnqueueReceipt {
            id: outcome.id,
            deduplicated: outcome.deduplicated,
        })
    }

    pub async fn queue_status(&self) -> Result<QueueStatusReport, AppError> {
        let counts = db::queue::status_counts(&self.shared.pool).await?;
        let dead_letter = db::dead_letter::count(&self.shared.pool).await?;
        Ok(QueueStatusReport {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            dead_letter,
            in_memory_depth: self.shared.dispatch.depth(),
        })
    }

    pub async fn processing_status(&self) -> Result<ProcessingStatus, AppError> {
        let queue = self.queue_status().await?;
        Ok(ProcessingStatus {
            initialized: self.is_initialized(),
            active: self.is_active().await,
            queue,
            stats: self.shared.stats.snapshot(),
            repository: self.shared.sink.repository_status().await,
        })
    }

    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        let mut guard = self
            .shared
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *guard = callback;
    }

    /// One-shot operator flush: sweep pending rows into the dispatch queue,
    /// run the loop if it is idle, poll until drained or the deadline, and
    /// report what happened. Reports partial progress instead of erroring.
    pub async fn process_batch_manually(&self) -> ManualFlushReport {
        if !self.is_initialized() {
            return ManualFlushReport {
                success: false,
                files_processed: 0,
                remaining_pending: 0,
                completed: 0,
                failed: 0,
                error: Some("processor not initialized".to_string()),
            };
        }

        let before = match self.queue_status().await {
            Ok(status) => status,
            Err(e) => return manual_error(e),
        };

        // Items that overflowed the dispatch queue earlier are swept back in.
        if let Err(e) = self.sweep_pending().await {
            return manual_error(e);
        }

        let started_here = self.start().await;

        let deadline = Instant::now() + MANUAL_FLUSH_DEADLINE;
        let mut latest = before;
        while Instant::now() < deadline {
            emit_progress(&self.shared).await;
            match self.queue_status().await {
                Ok(status) => {
                    latest = status;
                    if status.pending == 0 && status.processing == 0 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Status poll failed during manual flush: {e}");
                }
            }
            // Backlogs larger than the dispatch queue drain in waves; keep
            // refilling as the worker makes room. Duplicate pushes are
            // harmless: batch loading filters to still-pending rows.
            if let Err(e) = self.sweep_pending().await {
                tracing::warn!("Sweep failed during manual flush: {e}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if started_here {
            self.stop(true).await;
        }

        let after = self.queue_status().await.unwrap_or(latest);
        ManualFlushReport {
            success: true,
            files_processed: after.completed - before.completed,
            remaining_pending: after.pending + after.processing,
            completed: after.completed,
            failed: after.failed,
            error: None,
        }
    }

    /// Push pending row ids onto the dispatch queue, best effort, up to its
    /// capacity. Rows that do not fit stay durably pending.
    async fn sweep_pending(&self) -> Result<(), AppError> {
        let ids =
            db::queue::pending_ids(&self.shared.pool, self.shared.config.max_queue_size as i64)
                .await?;
        for id in ids {
            if !self.shared.dispatch.try_push(id) {
                break;
            }
        }
        Ok(())
    }

    pub async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterItem>, AppError> {
        Ok(db::dead_letter::list_recent(&self.shared.pool, limit).await?)
    }

    /// Retention cleanup of completed rows older than the given instant.
    pub async fn cleanup_completed(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(db::queue::cleanup_completed(&self.shared.pool, older_than).await?)
    }
}

fn manual_error(e: AppError) -> ManualFlushReport {
    ManualFlushReport {
        success: false,
        files_processed: 0,
        remaining_pending: 0,
        completed: 0,
        failed: 0,
        error: Some(e.to_string()),
    }
}

/// Validate and normalize an incoming request. Filenames must be single path
/// components; directories are stripped of leading/trailing slashes and must
/// not traverse upward.
fn normalize(mut request: FileRequest) -> Result<FileRequest, AppError> {
    let filename = request.filename.trim();
    if filename.is_empty() {
        return Err(AppError::BadRequest("filename must not be empty".to_string()));
    }
    if filename == "." || filename == ".." || !FILENAME_RE.is_match(filename) {
        return Err(AppError::BadRequest(format!(
            "invalid filename: {filename:?}"
        )));
    }
    request.filename = filename.to_string();

    let directory = request.directory.trim().trim_matches('/');
    if !directory.is_empty() {
        for part in directory.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(AppError::BadRequest(format!(
                    "invalid directory: {:?}",
                    request.directory
                )));
            }
        }
    }
    request.directory = directory.to_string();

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn request(filename: &str, directory: &str) -> FileRequest {
        FileRequest {
            filename: filename.to_string(),
            content: "hello".to_string(),
            directory: directory.to_string(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            priority: 0,
        }
    }

    #[test]
    fn normalize_accepts_plain_names() {
        let req = normalize(request("note.md", "voice/2026")).unwrap();
        assert_eq!(req.filename, "note.md");
        assert_eq!(req.directory, "voice/2026");
    }

    #[test]
    fn normalize_strips_directory_slashes() {
        let req = normalize(request("note.md", "/transcripts/")).unwrap();
        assert_eq!(req.directory, "transcripts");
    }

    #[test]
    fn normalize_rejects_traversal() {
        assert!(normalize(request("../etc/passwd", "")).is_err());
        assert!(normalize(request("note.md", "a/../b")).is_err());
        assert!(normalize(request("note.md", "a//b")).is_err());
    }

    #[test]
    fn normalize_rejects_empty_filename() {
        assert!(normalize(request("  ", "")).is_err());
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let a = request("note.md", "voice");
        let mut b = a.clone();
        assert_eq!(a.derive_idempotency_key(), b.derive_idempotency_key());

        b.filename = "other.md".to_string();
        assert_ne!(a.derive_idempotency_key(), b.derive_idempotency_key());
    }
}
