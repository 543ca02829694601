pub mod probe;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::probe::deadline::TimeoutHeaderError;
use crate::probe::settings::ValidationError;

// ─── Unified error type ──────────────────────────────────────────

/// Everything a probe can answer with instead of an exposition.
/// Bodies are plain text so Prometheus shows them in the target page.
#[derive(Debug)]
pub enum AppError {
    /// Request parameters did not resolve to settings.
    Validation(ValidationError),
    /// Timeout header present but unusable.
    TimeoutHeader(TimeoutHeaderError),
    /// A remote failure the caller has to see.
    Collection(String),
    /// Anything unexpected; details stay in the log.
    Internal,
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<TimeoutHeaderError> for AppError {
    fn from(e: TimeoutHeaderError) -> Self {
        Self::TimeoutHeader(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::TimeoutHeader(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to parse timeout from Prometheus header: {e}"),
            ),
            Self::Collection(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error while collecting metrics".to_string(),
            ),
        };

        (status, message).into_response()
    }
}
