// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use darkroom_core::JobError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(err) => match err {
                JobError::NotFound(id) => {
                    tracing::warn!(job_id = id, "job not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
                    )
                }
                JobError::InvalidState { .. } => {
                    tracing::warn!(error = %err, "operation rejected for current job status");
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_details("Invalid job state", err.to_string()),
                    )
                }
                JobError::NotCancelable(id) => {
                    tracing::warn!(job_id = id, "cancel rejected");
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_details(
                            "Job is not cancelable",
                            format!("Job ID: {id}"),
                        ),
                    )
                }
                JobError::Cancelled(_) => (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Job was cancelled", err.to_string()),
                ),
            },
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
