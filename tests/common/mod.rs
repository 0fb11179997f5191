use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

use gitscribe::config::{Config, QueueConfig};
use gitscribe::models::FileRequest;
use gitscribe::processor::BatchProcessor;
use gitscribe::sink::{SinkAdapter, SinkError};
use gitscribe::state::{AppState, SharedState};

/// Sink double: records every batch and fails the first `fail_first` calls.
pub struct MockSink {
    batches: Mutex<Vec<Vec<FileRequest>>>,
    calls: AtomicUsize,
    fail_first: usize,
    fail_init: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(fail_first: usize) -> Self {
        MockSink {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_first,
            fail_init: false,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn failing_initialization() -> Self {
        MockSink {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_first: 0,
            fail_init: true,
        }
    }

    /// Item counts of the successful sink calls, in invocation order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn batches(&self) -> Vec<Vec<FileRequest>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkAdapter for MockSink {
    async fn initialize(&self) -> Result<(), SinkError> {
        if self.fail_init {
            Err(SinkError::from("remote authentication refused"))
        } else {
            Ok(())
        }
    }

    async fn process_batch(&self, items: &[FileRequest]) -> Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(SinkError::from("simulated sink failure"));
        }
        self.batches.lock().unwrap().push(items.to_vec());
        Ok(())
    }
}

pub async fn test_pool() -> SqlitePool {
    let pool = gitscribe::db::connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    pool
}

/// Queue config tuned for tests: short batch wait, pacing disabled.
pub fn test_queue_config(batch_size: usize, max_retry_count: i64) -> QueueConfig {
    QueueConfig {
        batch_size,
        batch_timeout: Duration::from_millis(100),
        max_queue_size: 100,
        max_retry_count,
        stuck_processing_threshold: Duration::from_secs(300),
        memory_limit_mb: u64::MAX / (1024 * 1024),
    }
}

pub fn file_request(filename: &str) -> FileRequest {
    file_request_at(filename, Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap())
}

pub fn file_request_at(filename: &str, created_at: DateTime<Utc>) -> FileRequest {
    FileRequest {
        filename: filename.to_string(),
        content: format!("content of {filename}"),
        directory: "transcripts".to_string(),
        metadata: BTreeMap::from([("source".to_string(), "voice".to_string())]),
        created_at,
        priority: 0,
    }
}

pub fn build_processor(
    pool: SqlitePool,
    config: QueueConfig,
    sink: Arc<MockSink>,
) -> BatchProcessor {
    BatchProcessor::new(pool, config, sink)
}

/// A running admin server over a fresh in-memory store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub state: SharedState,
    pub sink: Arc<MockSink>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn spawn_app() -> TestApp {
    let pool = test_pool().await;
    let sink = Arc::new(MockSink::new());
    let processor = Arc::new(BatchProcessor::new(
        pool.clone(),
        test_queue_config(10, 5),
        sink.clone(),
    ));
    processor
        .initialize()
        .await
        .expect("processor initialization failed");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        log_level: "warn".to_string(),
        queue: test_queue_config(10, 5),
    };

    let state: SharedState = Arc::new(AppState {
        pool,
        config,
        processor,
    });

    let app = gitscribe::build_app(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });

    TestApp {
        addr,
        client: reqwest::Client::new(),
        state,
        sink,
    }
}
