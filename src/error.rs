//! Request-level error taxonomy.
//!
//! Every failure on `/convert` ends up as one of these variants and leaves the
//! server as an HTTP status plus `{"detail": "..."}`.

use crate::backends::BackendKind;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Invalid input ──────────────────────────────────────────────────────
    #[error("Only PDF files are supported")]
    NotPdf,

    #[error("Invalid library specified")]
    InvalidLibrary,

    #[error("Missing form field: {0}")]
    MissingField(&'static str),

    /// Malformed or oversized form body; keeps the status axum assigned.
    #[error("Multipart error: {message}")]
    Multipart { status: StatusCode, message: String },

    // ── Backend availability ───────────────────────────────────────────────
    #[error("{0} is not available")]
    Unavailable(BackendKind),

    // ── Faults ─────────────────────────────────────────────────────────────
    #[error("Conversion failed: {0}")]
    Backend(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ConvertError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotPdf | Self::InvalidLibrary | Self::Unavailable(_) => StatusCode::BAD_REQUEST,
            Self::Multipart { status, .. } => *status,
            Self::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Backend(_) | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MultipartRejection> for ConvertError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Multipart {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MultipartError> for ConvertError {
    fn from(e: MultipartError) -> Self {
        Self::Multipart {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            warn!("Rejected request: {}", self);
        }
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinct() {
        let errors = [
            ConvertError::NotPdf,
            ConvertError::InvalidLibrary,
            ConvertError::Unavailable(BackendKind::Marker),
        ];
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Only PDF files are supported",
                "Invalid library specified",
                "marker is not available",
            ]
        );
        assert!(errors.iter().all(|e| e.status() == StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_fault_statuses() {
        assert_eq!(
            ConvertError::Backend("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ConvertError::Unexpected("boom".into()).to_string(),
            "Unexpected error: boom"
        );
        assert_eq!(
            ConvertError::MissingField("library").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_multipart_keeps_its_status() {
        let err = ConvertError::Multipart {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "length limit exceeded".into(),
        };
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_string(), "Multipart error: length limit exceeded");
    }
}
