//! Unified error handling for the API.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use docmuse_shared::DocMuseError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Errors a handler can return before any stream starts.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    /// The product site or model backend could not be reached.
    Upstream(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        (
            status,
            Json(ApiError {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<DocMuseError> for AppError {
    fn from(err: DocMuseError) -> Self {
        match err {
            DocMuseError::Validation { message } => AppError::BadRequest(message),
            DocMuseError::NotFound(what) => AppError::NotFound(what),
            e @ (DocMuseError::Scraper(_) | DocMuseError::Network(_) | DocMuseError::Model(_)) => {
                tracing::warn!(error = %e, "upstream failure");
                AppError::Upstream(e.to_string())
            }
            e => {
                tracing::error!(error = %e, "internal error");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}
