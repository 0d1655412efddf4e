//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::ValidationIssue;
use saga::SagaError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be read at all (bad JSON, bad path id).
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn validation_body(issues: &[ValidationIssue]) -> Json<serde_json::Value> {
    Json(json!({ "errors": issues }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                validation_body(&[ValidationIssue::new("body", message)]),
            )
                .into_response(),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message })),
                )
                    .into_response()
            }
            ApiError::Saga(SagaError::Validation(issues)) => {
                (StatusCode::BAD_REQUEST, validation_body(&issues)).into_response()
            }
            ApiError::Saga(err) => {
                let status = match &err {
                    SagaError::NotFound(_) => StatusCode::NOT_FOUND,
                    SagaError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
                    SagaError::Persistence(_) | SagaError::Unavailable => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    SagaError::Validation(_) => StatusCode::BAD_REQUEST,
                };
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    tracing::error!(error = %err, "request failed");
                }
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
        }
    }
}
