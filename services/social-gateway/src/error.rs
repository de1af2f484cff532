//! Request-level errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use session_pool::ExecuteError;
use std::fmt::Display;
use thiserror::Error;

/// Errors a lookup handler can answer with.
///
/// Rendered as `{"error": "<message>"}` with the status from `status()`.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or unparsable query parameter
    #[error("{0}")]
    BadRequest(String),

    /// The profile or post does not exist
    #[error("{0}")]
    NotFound(&'static str),

    /// Every account/proxy attempt failed
    #[error("{0}")]
    Exhausted(String),
}

impl ApiError {
    /// Map a failover outcome, using `not_found` as the 404 message.
    pub fn from_execute<E: Display>(err: ExecuteError<E>, not_found: &'static str) -> Self {
        match err {
            ExecuteError::Terminal { .. } => ApiError::NotFound(not_found),
            ExecuteError::Exhausted { last, .. } => ApiError::Exhausted(last.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Exhausted(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), axum::Json(body)).into_response()
    }
}
