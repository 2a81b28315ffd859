//! Document routes: `/`, `/health`, `/documents`, `/doc/{name}`,
//! `/documents/{name}`.
//!
//! Lists and serves the `*.json` files of the documents directory. Every
//! JSON body goes through the configured [`Protection`](crate::protection::Protection)
//! before it is written.

use std::io::ErrorKind;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::AppError;
use crate::state::DocumentState;

/// File suffix of servable documents.
const DOCUMENT_SUFFIX: &str = ".json";

/// Build the document router.
pub fn router() -> Router<Arc<DocumentState>> {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/documents", get(list_documents))
        .route("/documents/", get(missing_name))
        .route("/documents/{*name}", get(get_document))
        .route("/doc/", get(missing_name))
        .route("/doc/{*name}", get(get_document))
}

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    #[serde(rename = "docsDir")]
    docs_dir: std::borrow::Cow<'a, str>,
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<String>,
    count: usize,
}

async fn health(State(state): State<Arc<DocumentState>>) -> Result<Response, AppError> {
    let body = serialize(&Health {
        status: "healthy",
        docs_dir: state.docs_dir.to_string_lossy(),
    })?;
    json_response(&state, body)
}

async fn list_documents(State(state): State<Arc<DocumentState>>) -> Result<Response, AppError> {
    let mut entries = tokio::fs::read_dir(&state.docs_dir).await.map_err(|e| {
        error!(dir = %state.docs_dir.display(), error = %e, "failed to read documents directory");
        AppError::Internal("failed to read documents directory".to_owned())
    })?;

    let mut documents = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!(dir = %state.docs_dir.display(), error = %e, "failed to read documents directory entry");
                return Err(AppError::Internal(
                    "failed to read documents directory".to_owned(),
                ));
            }
        };

        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if is_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(DOCUMENT_SUFFIX) {
                documents.push(name.to_owned());
            }
        }
    }
    documents.sort();

    let body = serialize(&DocumentList {
        count: documents.len(),
        documents,
    })?;
    json_response(&state, body)
}

async fn get_document(
    State(state): State<Arc<DocumentState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let file_name = document_file_name(&name)?;
    let path = state.docs_dir.join(&file_name);

    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            AppError::NotFound("document not found".to_owned())
        } else {
            error!(path = %path.display(), error = %e, "failed to read document");
            AppError::Internal("failed to read document".to_owned())
        }
    })?;

    if let Err(e) = serde_json::from_slice::<serde::de::IgnoredAny>(&data) {
        warn!(path = %path.display(), error = %e, "document is not valid JSON");
        return Err(AppError::Internal("document is not valid JSON".to_owned()));
    }

    json_response(&state, data)
}

async fn missing_name() -> AppError {
    AppError::BadRequest("no document name specified".to_owned())
}

/// Map a requested document name to a file name inside the documents
/// directory.
///
/// The `.json` suffix is optional. Empty names, parent-directory segments,
/// path separators and NUL bytes are rejected before anything touches the
/// filesystem.
pub fn document_file_name(name: &str) -> Result<String, AppError> {
    let stem = name.strip_suffix(DOCUMENT_SUFFIX).unwrap_or(name);

    if stem.is_empty() {
        return Err(AppError::BadRequest(
            "no document name specified".to_owned(),
        ));
    }

    if stem.contains("..") || stem.contains(['/', '\\', '\0']) {
        return Err(AppError::BadRequest("invalid document name".to_owned()));
    }

    Ok(format!("{stem}{DOCUMENT_SUFFIX}"))
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(value).map_err(|e| {
        error!(error = %e, "failed to serialize response");
        AppError::Internal("failed to serialize response".to_owned())
    })
}

fn json_response(state: &DocumentState, body: Vec<u8>) -> Result<Response, AppError> {
    let body = state.protection.protect(body)?;
    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}
