//! HTTP error types for the `marnotes` document service.
//!
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`. Messages are sanitized: filesystem
//! and cryptographic details are logged, never returned to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use marnotes_core::error::CipherError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Decode and decryption failures only arise from inbound envelopes, which
/// are reserved for routes that accept a request body.
impl From<CipherError> for AppError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Decode { .. } | CipherError::Decryption { .. } => {
                warn!(error = %err, "rejected encrypted payload");
                Self::BadRequest("invalid encrypted payload".to_owned())
            }
            CipherError::PayloadTooLarge { .. } | CipherError::Encryption { .. } => {
                error!(error = %err, "failed to protect response");
                Self::Internal("response could not be protected".to_owned())
            }
        }
    }
}
