use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub queue: QueueConfig,
}

/// Tunables for the queue core. Defaults mirror the remote API limits the
/// batch sizes were picked for.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum items handed to the sink in one batch.
    pub batch_size: usize,
    /// How long the worker blocks waiting for the first item of a batch.
    pub batch_timeout: Duration,
    /// Capacity of the in-memory dispatch queue. Rows beyond this stay
    /// durably pending and are picked up by later sweeps.
    pub max_queue_size: usize,
    /// Failures before an item is moved to dead_letter.
    pub max_retry_count: i64,
    /// Age past which a 'processing' row is assumed orphaned by a crash.
    pub stuck_processing_threshold: Duration,
    /// RSS above which the worker halves its effective batch size.
    pub memory_limit_mb: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            batch_size: 10,
            batch_timeout: Duration::from_secs(30),
            max_queue_size: 1000,
            max_retry_count: 5,
            stuck_processing_threshold: Duration::from_secs(300),
            memory_limit_mb: 512,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("GITSCRIBE_HOST", "127.0.0.1")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_HOST: {e}"))?;

        let port: u16 = env_or("GITSCRIBE_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_PORT: {e}"))?;

        let log_level = env_or("GITSCRIBE_LOG_LEVEL", "info");

        let batch_size: usize = env_or("GITSCRIBE_BATCH_SIZE", "10")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_BATCH_SIZE: {e}"))?;
        if batch_size == 0 {
            return Err("GITSCRIBE_BATCH_SIZE must be at least 1".to_string());
        }

        let batch_timeout_secs: u64 = env_or("GITSCRIBE_BATCH_TIMEOUT_SECONDS", "30")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_BATCH_TIMEOUT_SECONDS: {e}"))?;

        let max_queue_size: usize = env_or("GITSCRIBE_MAX_QUEUE_SIZE", "1000")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_MAX_QUEUE_SIZE: {e}"))?;
        if max_queue_size == 0 {
            return Err("GITSCRIBE_MAX_QUEUE_SIZE must be at least 1".to_string());
        }

        let max_retry_count: i64 = env_or("GITSCRIBE_MAX_RETRY_COUNT", "5")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_MAX_RETRY_COUNT: {e}"))?;

        let memory_limit_mb: u64 = env_or("GITSCRIBE_MEMORY_LIMIT_MB", "512")
            .parse()
            .map_err(|e| format!("Invalid GITSCRIBE_MEMORY_LIMIT_MB: {e}"))?;

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            queue: QueueConfig {
                batch_size,
                batch_timeout: Duration::from_secs(batch_timeout_secs),
                max_queue_size,
                max_retry_count,
                stuck_processing_threshold: Duration::from_secs(300),
                memory_limit_mb,
            },
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
