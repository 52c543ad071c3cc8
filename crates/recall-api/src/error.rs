//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping `RecallError` kinds to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use recall_core::error::RecallError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 409 Conflict - the request races or contradicts stored state.
    Conflict(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 503 Service Unavailable - embedding provider failed.
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        if status.is_server_error() {
            tracing::error!(status = %status, message = %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<RecallError> for ApiError {
    fn from(err: RecallError) -> Self {
        let message = err.to_string();
        match err {
            RecallError::NamespaceNotFound(_) | RecallError::EntryNotFound(_) => {
                ApiError::NotFound(message)
            }
            RecallError::OutOfOrder { .. }
            | RecallError::DuplicateKey { .. }
            | RecallError::InvalidTransition { .. }
            | RecallError::NamespaceNotWritable(_) => ApiError::Conflict(message),
            RecallError::DimensionMismatch { .. }
            | RecallError::InvalidWeight(_)
            | RecallError::InvalidCursor(_)
            | RecallError::Validation(_) => ApiError::BadRequest(message),
            RecallError::EmbeddingProvider(_) => ApiError::ServiceUnavailable(message),
            _ => ApiError::Internal(message),
        }
    }
}
