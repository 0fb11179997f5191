use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::processor::BatchProcessor;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub processor: Arc<BatchProcessor>,
}
