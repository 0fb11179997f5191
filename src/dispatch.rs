use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;

/// Bounded in-memory FIFO of active_queue row ids.
///
/// This is a performance cache over the durable store, never authoritative:
/// it holds indices only, and can always be rebuilt from the store (that is
/// exactly what the recovery routine does). Producers never block; when the
/// queue is full the row simply stays durably pending until a later sweep.
pub struct DispatchQueue {
    tx: mpsc::Sender<i64>,
    rx: Mutex<mpsc::Receiver<i64>>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        DispatchQueue {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Best-effort, non-blocking push. Returns false when the queue is full
    /// or closed; the caller must treat that as fine.
    pub fn try_push(&self, id: i64) -> bool {
        match self.tx.try_send(id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Dispatch queue full, item {id} stays durably pending");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Collect ids for one batch: block up to `timeout` for the first id,
    /// then drain whatever else is immediately available, up to `max` total.
    /// Returns an empty vec on timeout.
    pub async fn collect_batch(&self, timeout: Duration, max: usize) -> Vec<i64> {
        let mut rx = self.rx.lock().await;

        let first = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(id)) => id,
            Ok(None) | Err(_) => return Vec::new(),
        };

        let mut ids = Vec::with_capacity(max);
        ids.push(first);
        while ids.len() < max {
            match rx.try_recv() {
                Ok(id) => ids.push(id),
                Err(_) => break,
            }
        }
        ids
    }

    /// Number of ids currently buffered.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
