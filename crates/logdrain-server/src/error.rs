//! Centralized conversion of handler failures into client responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StorageError;

/// Error type returned by every route handler.
///
/// Client errors keep their message. Server errors are logged in full and
/// rendered as a generic body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "service unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": msg }))).into_response()
            }
            Self::Storage(e) => {
                tracing::error!(error = %e, source = ?std::error::Error::source(&e), "storage error");
                internal_error()
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "unhandled error");
                internal_error()
            }
        }
    }
}

pub(crate) fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

/// `CatchPanicLayer` handler: a panicking handler becomes the generic 500.
pub(crate) fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = detail, "handler panicked");
    internal_error()
}
