//! HTTP routes for the document service.

pub mod documents;
pub mod keys;

use std::sync::Arc;

use axum::Router;
use axum::http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::DocumentState;

/// Build the complete document-service router with its middleware stack.
///
/// The web UI is served from a different port, so every response carries
/// permissive CORS headers and `OPTIONS` on any path is answered by the
/// CORS layer with an empty 200.
pub fn document_router(state: Arc<DocumentState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .merge(documents::router())
        .merge(keys::router())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("no such route".to_owned())
}
