use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Stage of subsystem startup, carried by `AppError::Init` so the caller can
/// tell which chained dependency refused to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Sink,
    Store,
    Recovery,
}

impl InitStage {
    pub fn as_str(self) -> &'static str {
        match self {
            InitStage::Sink => "sink",
            InitStage::Store => "store",
            InitStage::Recovery => "recovery",
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Init { stage: InitStage, message: String },
    Database(sqlx::Error),
    Payload(serde_json::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::Init { stage, message } => {
                write!(
                    f,
                    "Initialization failed at stage '{}': {message}",
                    stage.as_str()
                )
            }
            AppError::Database(err) => write!(f, "Database Error: {err}"),
            AppError::Payload(err) => write!(f, "Payload Error: {err}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Init { .. } => {
                tracing::error!("{self}");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Payload(err) => {
                tracing::error!("Payload error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Payload(err)
    }
}
