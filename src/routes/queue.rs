use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::processor::{ManualFlushReport, ProcessingStatus, QueueStatusReport};
use crate::state::SharedState;

pub async fn status(
    State(state): State<SharedState>,
) -> Result<Json<QueueStatusReport>, AppError> {
    Ok(Json(state.processor.queue_status().await?))
}

pub async fn processing_status(
    State(state): State<SharedState>,
) -> Result<Json<ProcessingStatus>, AppError> {
    Ok(Json(state.processor.processing_status().await?))
}

/// Operator-triggered one-shot flush. Always answers 200; partial success
/// lives in the report body.
pub async fn process(State(state): State<SharedState>) -> Json<ManualFlushReport> {
    Json(state.processor.process_batch_manually().await)
}

#[derive(Deserialize)]
pub struct DeadLetterParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn dead_letter(
    State(state): State<SharedState>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = params.limit.clamp(1, 500);
    let items = state.processor.dead_letters(limit).await?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_cleanup_hours")]
    pub older_than_hours: i64,
}

fn default_cleanup_hours() -> i64 {
    24
}

pub async fn cleanup(
    State(state): State<SharedState>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.older_than_hours < 0 {
        return Err(AppError::BadRequest(
            "older_than_hours must be non-negative".to_string(),
        ));
    }

    let cutoff = Utc::now() - ChronoDuration::hours(req.older_than_hours);
    let removed = state.processor.cleanup_completed(cutoff).await?;
    Ok(Json(json!({ "removed": removed })))
}
