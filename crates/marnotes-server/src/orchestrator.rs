//! Service bootstrap.
//!
//! Turns a [`ServerConfig`] into running listeners:
//!
//! 1. **Prepare**: create the documents directory, load or generate the key
//!    pair, build the web bundle, resolve each listener's port, and
//!    construct every router. Any failure here is fatal and happens before
//!    anything binds.
//! 2. **Serve**: spawn one task per listener (bind, then serve) into a
//!    `JoinSet` and join them all. The first failure is logged immediately
//!    and stops the remaining listeners gracefully; once every task has
//!    finished, all captured failures are returned as one error.
//!
//! An external shutdown signal stops every listener the same way.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use marnotes_core::error::KeyStoreError;
use marnotes_core::keystore::KeyStore;

use crate::assets::{AssetBuilder, BuildError};
use crate::config::{ConfigError, ServerConfig};
use crate::ports::{PortResolution, ensure_available_port};
use crate::protection::Protection;
use crate::routes::document_router;
use crate::state::DocumentState;
use crate::web::{WebError, WebShell};

/// Name of the document API listener.
pub const DOCUMENT_LISTENER: &str = "document";

/// Name of the web UI listener.
pub const WEB_LISTENER: &str = "web";

/// A listener that is ready to bind.
#[derive(Debug)]
pub struct ListenerSpec {
    /// Human-readable listener name used in logs and errors.
    pub name: &'static str,
    /// Requested and resolved addresses.
    pub resolution: PortResolution,
    /// Fully assembled router.
    pub router: Router,
}

impl ListenerSpec {
    /// Resolve `requested` through port arbitration and wrap `router`.
    ///
    /// `reserved` holds ports already resolved for other listeners of this
    /// process; they are skipped because nothing has bound them yet.
    #[must_use]
    pub fn resolve(
        name: &'static str,
        requested: SocketAddr,
        window: u16,
        reserved: &[u16],
        router: Router,
    ) -> Self {
        Self {
            name,
            resolution: ensure_available_port(requested, window, reserved),
            router,
        }
    }
}

/// A listener that failed to bind or stopped with an error.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Binding the resolved address failed.
    #[error("{name} server failed to bind {addr}: {source}")]
    Bind {
        name: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server loop returned an error.
    #[error("{name} server on {addr} failed: {source}")]
    Serve {
        name: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The listener task panicked or was cancelled.
    #[error("listener task aborted: {reason}")]
    Task { reason: String },
}

/// Fatal startup or runtime failure of the service as a whole.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The documents directory could not be created.
    #[error("failed to create documents directory '{}': {source}", path.display())]
    DocumentsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The web application directory does not exist.
    #[error("web app directory does not exist: {}", path.display())]
    WebDirMissing { path: PathBuf },

    /// Loading or generating the key pair failed.
    #[error("key pair unavailable: {0}")]
    Keys(#[from] KeyStoreError),

    /// The key generation task panicked.
    #[error("key pair task aborted: {reason}")]
    KeyTask { reason: String },

    /// The web bundle build failed.
    #[error("failed to build web app assets: {0}")]
    Build(#[from] BuildError),

    /// The web UI shell could not be prepared.
    #[error(transparent)]
    Web(#[from] WebError),

    /// One or more listeners failed.
    #[error("{}", describe_failures(.0))]
    ListenersFailed(Vec<ListenerError>),
}

fn describe_failures(failures: &[ListenerError]) -> String {
    let details = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} listener(s) failed: {details}", failures.len())
}

/// Prepare and serve every listener the configuration asks for.
///
/// Returns once all listeners have stopped, either after `shutdown` fires
/// or after a listener fails.
///
/// # Errors
///
/// Any [`OrchestratorError`] from [`prepare`] or [`serve`].
pub async fn run(
    config: &ServerConfig,
    builder: &dyn AssetBuilder,
    shutdown: watch::Receiver<bool>,
) -> Result<(), OrchestratorError> {
    let listeners = prepare(config, builder).await?;
    serve(listeners, shutdown).await
}

/// Build every listener for `config` without binding anything.
///
/// The document port is resolved first because the web shell embeds it.
/// In web-only mode the document service runs elsewhere, so its requested
/// port is passed to the shell unchanged.
///
/// # Errors
///
/// Fails on documents directory creation, key pair, web directory, asset
/// build, or template errors.
pub async fn prepare(
    config: &ServerConfig,
    builder: &dyn AssetBuilder,
) -> Result<Vec<ListenerSpec>, OrchestratorError> {
    let mut listeners: Vec<ListenerSpec> = Vec::with_capacity(2);
    let mut document_addr = config.document_addr;

    if config.mode.serves_documents() {
        ensure_docs_dir(&config.docs_dir).await?;
        let state = build_document_state(config).await?;
        let spec = ListenerSpec::resolve(
            DOCUMENT_LISTENER,
            config.document_addr,
            config.port_scan_window,
            &[],
            document_router(Arc::new(state)),
        );
        document_addr = spec.resolution.resolved;
        info!(
            addr = %document_addr,
            substituted = spec.resolution.substituted(),
            docs_dir = %config.docs_dir.display(),
            "JSON server prepared"
        );
        listeners.push(spec);
    }

    if config.mode.serves_web() {
        if !tokio::fs::metadata(&config.web_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(OrchestratorError::WebDirMissing {
                path: config.web_dir.clone(),
            });
        }

        builder.build(&config.web_dir).await?;

        let shell = WebShell::load(&config.web_dir, document_addr.port()).await?;
        let reserved: Vec<u16> = listeners
            .iter()
            .map(|l| l.resolution.resolved.port())
            .collect();
        let spec = ListenerSpec::resolve(
            WEB_LISTENER,
            config.web_addr,
            config.port_scan_window,
            &reserved,
            shell.router(),
        );
        info!(
            addr = %spec.resolution.resolved,
            substituted = spec.resolution.substituted(),
            web_dir = %config.web_dir.display(),
            document_port = document_addr.port(),
            "web app server prepared"
        );
        listeners.push(spec);
    }

    Ok(listeners)
}

/// Bind and serve `listeners` concurrently until all of them stop.
///
/// # Errors
///
/// Returns [`OrchestratorError::ListenersFailed`] with every captured
/// failure once all listener tasks have terminated.
pub async fn serve(
    listeners: Vec<ListenerSpec>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), OrchestratorError> {
    let (stop_tx, _) = watch::channel(false);

    let mut tasks = JoinSet::new();
    for spec in listeners {
        tasks.spawn(run_listener(spec, stop_tx.subscribe()));
    }

    let mut failures = Vec::new();
    let mut watching_shutdown = true;
    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let failure = match joined {
                    None => break,
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => e,
                    Some(Err(e)) => ListenerError::Task { reason: e.to_string() },
                };
                error!(error = %failure, "listener failed, stopping remaining listeners");
                failures.push(failure);
                let _ = stop_tx.send(true);
            }
            changed = shutdown.changed(), if watching_shutdown => {
                watching_shutdown = false;
                if changed.is_ok() {
                    info!("shutdown requested, stopping listeners");
                    let _ = stop_tx.send(true);
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::ListenersFailed(failures))
    }
}

async fn run_listener(
    spec: ListenerSpec,
    stop: watch::Receiver<bool>,
) -> Result<(), ListenerError> {
    let ListenerSpec {
        name,
        resolution,
        router,
    } = spec;
    let addr = resolution.resolved;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { name, addr, source })?;
    let bound = listener.local_addr().unwrap_or(addr);
    info!(listener = name, addr = %bound, requested = %resolution.requested, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(stopped(stop))
        .await
        .map_err(|source| ListenerError::Serve {
            name,
            addr: bound,
            source,
        })?;

    info!(listener = name, "stopped");
    Ok(())
}

/// Resolves once `stop` carries `true`. Never resolves if the sender is
/// dropped without stopping.
async fn stopped(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn ensure_docs_dir(dir: &Path) -> Result<(), OrchestratorError> {
    if tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| OrchestratorError::DocumentsDir {
            path: dir.to_path_buf(),
            source,
        })?;
    info!(dir = %dir.display(), "created documents directory");
    Ok(())
}

async fn build_document_state(config: &ServerConfig) -> Result<DocumentState, OrchestratorError> {
    let state = DocumentState::new(&config.docs_dir);

    let Some(key_config) = &config.keys else {
        Protection::select(config.encryption, None)?;
        return Ok(state);
    };

    let store = KeyStore::new(&key_config.dir);
    let bits = key_config.bits;
    let keys = tokio::task::spawn_blocking(move || store.load_or_generate(bits))
        .await
        .map_err(|e| OrchestratorError::KeyTask {
            reason: e.to_string(),
        })??;
    let keys = Arc::new(keys);

    let protection = Protection::select(config.encryption, Some(&keys))?;
    info!(
        key_dir = %key_config.dir.display(),
        encrypt_responses = protection.is_sealed(),
        "key pair ready"
    );

    Ok(state.with_keys(keys, protection))
}
