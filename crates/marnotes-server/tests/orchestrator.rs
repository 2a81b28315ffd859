//! Integration tests for listener preparation and concurrent serving.
//!
//! These tests bind real loopback sockets. Ports are chosen by asking the
//! OS for a free one, so they do not depend on anything else running on
//! the machine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::{SocketAddr, TcpListener as StdListener};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use marnotes_server::assets::{AssetBuilder, BuildError};
use marnotes_server::config::{EncryptionMode, KeyConfig, ServerConfig, ServiceMode};
use marnotes_server::orchestrator::{
    self, DOCUMENT_LISTENER, ListenerError, ListenerSpec, OrchestratorError, WEB_LISTENER,
};
use marnotes_server::ports::PortResolution;

/// Records how often it was asked to build; optionally fails.
#[derive(Default)]
struct FakeBuilder {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl AssetBuilder for FakeBuilder {
    async fn build(&self, _web_dir: &Path) -> Result<(), BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(BuildError::Spawn {
                command: "npm run build:dev".to_owned(),
                source: std::io::Error::other("boom"),
            })
        } else {
            Ok(())
        }
    }
}

fn free_addr() -> SocketAddr {
    let probe = StdListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap()
}

fn fixed(name: &'static str, addr: SocketAddr, router: Router) -> ListenerSpec {
    ListenerSpec {
        name,
        resolution: PortResolution {
            requested: addr,
            resolved: addr,
        },
        router,
    }
}

fn hello() -> Router {
    Router::new().route("/", get(|| async { "hello" }))
}

fn config(root: &Path, mode: ServiceMode) -> ServerConfig {
    ServerConfig {
        mode,
        docs_dir: root.join("documents"),
        web_dir: root.join("web"),
        document_addr: free_addr(),
        web_addr: free_addr(),
        keys: None,
        encryption: EncryptionMode::Disabled,
        port_scan_window: 100,
        web_build_script: "build:dev".to_owned(),
        log_level: "info".to_owned(),
    }
}

fn web_app(root: &Path) {
    let public = root.join("web").join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "port={{.JSONPort}}").unwrap();
}

/// Issue a bare HTTP/1.1 GET and return the raw response.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = None;
    for _ in 0..50 {
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut stream = stream.expect("listener never came up");
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

// ── Serving ──────────────────────────────────────────────────────────

#[tokio::test]
async fn listeners_serve_until_shutdown() {
    let first = free_addr();
    let second = free_addr();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = tokio::spawn(orchestrator::serve(
        vec![fixed("first", first, hello()), fixed("second", second, hello())],
        shutdown_rx,
    ));

    assert!(http_get(first, "/").await.ends_with("hello"));
    assert!(http_get(second, "/").await.ends_with("hello"));

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("serve did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn bind_failure_stops_peers_and_is_reported() {
    let occupied = StdListener::bind("127.0.0.1:0").unwrap();
    let busy = occupied.local_addr().unwrap();
    let healthy = free_addr();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator::serve(
            vec![fixed("healthy", healthy, hello()), fixed("busy", busy, hello())],
            shutdown_rx,
        ),
    )
    .await
    .expect("healthy listener was not stopped after peer failure");

    match result {
        Err(OrchestratorError::ListenersFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(
                &failures[0],
                ListenerError::Bind { name: "busy", addr, .. } if *addr == busy
            ));
        }
        other => panic!("expected aggregated listener failure, got {other:?}"),
    }
    drop(occupied);
}

#[tokio::test]
async fn busy_port_is_substituted_before_binding() {
    let occupied = StdListener::bind("127.0.0.1:0").unwrap();
    let busy = occupied.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let spec = ListenerSpec::resolve("substitute", busy, 100, &[], hello());
    assert!(spec.resolution.substituted());
    let resolved = spec.resolution.resolved;
    assert!(resolved.port() > busy.port());

    let server = tokio::spawn(orchestrator::serve(vec![spec], shutdown_rx));
    assert!(http_get(resolved, "/").await.ends_with("hello"));

    shutdown_tx.send(true).unwrap();
    server.await.unwrap().unwrap();
    drop(occupied);
}

// ── Preparation ──────────────────────────────────────────────────────

#[tokio::test]
async fn documents_only_creates_docs_dir_and_skips_web() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), ServiceMode::DocumentsOnly);
    let builder = FakeBuilder::default();

    let listeners = orchestrator::prepare(&config, &builder).await.unwrap();
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].name, DOCUMENT_LISTENER);
    assert!(config.docs_dir.is_dir());
    assert_eq!(builder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn both_services_embed_the_resolved_document_port() {
    let root = tempfile::tempdir().unwrap();
    web_app(root.path());
    let config = config(root.path(), ServiceMode::Both);
    let builder = FakeBuilder::default();

    let listeners = orchestrator::prepare(&config, &builder).await.unwrap();
    assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
    let names: Vec<_> = listeners.iter().map(|l| l.name).collect();
    assert_eq!(names, [DOCUMENT_LISTENER, WEB_LISTENER]);

    let document_addr = listeners[0].resolution.resolved;
    let web_addr = listeners[1].resolution.resolved;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(orchestrator::serve(listeners, shutdown_rx));

    let page = http_get(web_addr, "/any/client/route").await;
    assert!(page.ends_with(&format!("port={}", document_addr.port())), "{page}");
    let health = http_get(document_addr, "/health").await;
    assert!(health.contains("\"status\":\"healthy\""), "{health}");

    shutdown_tx.send(true).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn busy_document_port_is_substituted_during_prepare() {
    let root = tempfile::tempdir().unwrap();
    let occupied = StdListener::bind("127.0.0.1:0").unwrap();
    let busy = occupied.local_addr().unwrap();
    let mut config = config(root.path(), ServiceMode::DocumentsOnly);
    config.document_addr = busy;

    let listeners = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap();
    let resolution = listeners[0].resolution;
    assert_eq!(resolution.requested, busy);
    assert!(resolution.substituted());
    assert!(resolution.resolved.port() > busy.port());
    drop(occupied);
}

#[tokio::test]
async fn web_listener_never_takes_the_substituted_document_port() {
    let root = tempfile::tempdir().unwrap();
    web_app(root.path());
    let occupied = StdListener::bind("127.0.0.1:0").unwrap();
    let busy = occupied.local_addr().unwrap();
    let mut config = config(root.path(), ServiceMode::Both);
    config.document_addr = busy;
    config.web_addr = SocketAddr::new(busy.ip(), busy.port() + 1);

    let listeners = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap();
    let document_addr = listeners[0].resolution.resolved;
    let web_addr = listeners[1].resolution.resolved;
    assert!(listeners[0].resolution.substituted());
    assert_ne!(document_addr, web_addr);
    assert_eq!(listeners[1].resolution.requested, config.web_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(orchestrator::serve(listeners, shutdown_rx));

    let page = http_get(web_addr, "/").await;
    assert!(page.ends_with(&format!("port={}", document_addr.port())), "{page}");
    let health = http_get(document_addr, "/health").await;
    assert!(health.contains("\"status\":\"healthy\""), "{health}");

    shutdown_tx.send(true).unwrap();
    server.await.unwrap().unwrap();
    drop(occupied);
}

#[tokio::test]
async fn web_only_uses_the_requested_document_port() {
    let root = tempfile::tempdir().unwrap();
    web_app(root.path());
    let mut config = config(root.path(), ServiceMode::WebOnly);
    config.document_addr = SocketAddr::from(([127, 0, 0, 1], 18080));

    let listeners = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap();
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].name, WEB_LISTENER);
    assert!(!config.docs_dir.exists());
}

#[tokio::test]
async fn build_failure_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    web_app(root.path());
    let config = config(root.path(), ServiceMode::Both);
    let builder = FakeBuilder {
        fail: true,
        ..FakeBuilder::default()
    };

    let err = orchestrator::prepare(&config, &builder).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Build(_)));
}

#[tokio::test]
async fn missing_web_dir_is_fatal_and_skips_build() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), ServiceMode::WebOnly);
    let builder = FakeBuilder::default();

    let err = orchestrator::prepare(&config, &builder).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::WebDirMissing { .. }));
    assert_eq!(builder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_index_template_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("web")).unwrap();
    let config = config(root.path(), ServiceMode::WebOnly);

    let err = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Web(_)));
}

#[tokio::test]
async fn key_dir_generates_and_persists_the_key_pair() {
    let root = tempfile::tempdir().unwrap();
    let key_dir = root.path().join("keys");
    let mut config = config(root.path(), ServiceMode::DocumentsOnly);
    config.keys = Some(KeyConfig {
        dir: key_dir.clone(),
        bits: 2048,
    });
    config.encryption = EncryptionMode::Enabled;

    let listeners = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap();
    assert_eq!(listeners.len(), 1);
    assert!(key_dir.join("private.pem").is_file());
    assert!(key_dir.join("public.pem").is_file());
}

#[tokio::test]
async fn encryption_without_keys_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mut config = config(root.path(), ServiceMode::DocumentsOnly);
    config.encryption = EncryptionMode::Enabled;

    let err = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Config(_)));
}

#[tokio::test]
async fn docs_dir_that_is_a_file_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), ServiceMode::DocumentsOnly);
    std::fs::write(&config.docs_dir, "not a directory").unwrap();

    let err = orchestrator::prepare(&config, &FakeBuilder::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DocumentsDir { .. }));
}

#[test]
fn aggregated_failures_name_every_listener() {
    let err = OrchestratorError::ListenersFailed(vec![
        ListenerError::Bind {
            name: "document",
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            source: std::io::Error::other("in use"),
        },
        ListenerError::Task {
            reason: "panicked".to_owned(),
        },
    ]);
    let message = err.to_string();
    assert!(message.starts_with("2 listener(s) failed"));
    assert!(message.contains("document server failed to bind 127.0.0.1:8080"));
    assert!(message.contains("panicked"));
}

