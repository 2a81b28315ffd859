//! `marnotes` entry point.
//!
//! Parses flags, initialises structured logging, prepares every listener
//! (documents directory, key pair, web bundle, port arbitration), then
//! serves until SIGINT/SIGTERM or the first listener failure.

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use marnotes_server::assets::NpmBuilder;
use marnotes_server::config::{Args, ServerConfig};
use marnotes_server::orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse()
        .into_config()
        .context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(mode = ?config.mode, encryption = ?config.encryption, "marnotes starting");

    if let Err(err) = run(&config).await {
        error!(error = %format!("{err:#}"), "marnotes exiting");
        return Err(err);
    }

    info!("marnotes stopped");
    Ok(())
}

async fn run(config: &ServerConfig) -> anyhow::Result<()> {
    let builder = NpmBuilder::new(config.web_build_script.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    orchestrator::run(config, &builder, shutdown_rx)
        .await
        .context("marnotes failed")
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM) and notify listeners.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(true);
}
