//! Public key route: `/publickey`.
//!
//! Unauthenticated; the public key is not secret. Clients use it to encrypt
//! payloads only this deployment can read.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::error;

use crate::error::AppError;
use crate::state::DocumentState;

/// Build the public key router.
pub fn router() -> Router<Arc<DocumentState>> {
    Router::new().route("/publickey", get(public_key))
}

async fn public_key(State(state): State<Arc<DocumentState>>) -> Result<Response, AppError> {
    let keys = state
        .keys
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("public key not available".to_owned()))?;

    let pem = keys.public_key_pem().map_err(|e| {
        error!(error = %e, "failed to export public key");
        AppError::Internal("failed to export public key".to_owned())
    })?;

    Ok(([(CONTENT_TYPE, "text/plain")], pem).into_response())
}
