//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the unified error type for all endpoints. Its
//! `IntoResponse` produces `{"success": false, "error": <message>, "code":
//! <CODE>}` with the matching status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use profilerx_core::CoreError;
use profilerx_engine::EngineError;
use profilerx_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unknown workflow (404).
    #[error("{0}")]
    NotFound(String),

    /// Invalid request or rejected archive operation (400).
    #[error("{0}")]
    BadRequest(String),

    /// Internal server error (500).
    #[error("{0}")]
    InternalError(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::InternalError(err.to_string())
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Storage(e) => e.into(),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
