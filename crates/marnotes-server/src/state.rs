//! Shared state for the document service.
//!
//! A single [`DocumentState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. Nothing in it is mutated after construction, so
//! handlers read it without locking.

use std::path::PathBuf;
use std::sync::Arc;

use marnotes_core::keystore::KeyPair;

use crate::protection::Protection;

/// Shared state passed to every document-service handler.
pub struct DocumentState {
    /// Directory the JSON documents are served from.
    pub docs_dir: PathBuf,
    /// Deployment key pair (None if no key directory is configured).
    pub keys: Option<Arc<KeyPair>>,
    /// Strategy applied to every JSON response body.
    pub protection: Protection,
}

impl DocumentState {
    /// State serving `docs_dir` in clear with no key pair.
    #[must_use]
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
            keys: None,
            protection: Protection::Plain,
        }
    }

    /// Attach a key pair and the protection strategy selected for it.
    #[must_use]
    pub fn with_keys(mut self, keys: Arc<KeyPair>, protection: Protection) -> Self {
        self.keys = Some(keys);
        self.protection = protection;
        self
    }
}

impl std::fmt::Debug for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentState")
            .field("docs_dir", &self.docs_dir)
            .field("keys", &self.keys.is_some())
            .field("sealed", &self.protection.is_sealed())
            .finish()
    }
}
