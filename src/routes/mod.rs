pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/queue/status", get(queue::status))
        .route("/api/v1/queue/process", post(queue::process))
        .route("/api/v1/queue/dead-letter", get(queue::dead_letter))
        .route("/api/v1/queue/cleanup", post(queue::cleanup))
        .route("/api/v1/processing/status", get(queue::processing_status))
}
