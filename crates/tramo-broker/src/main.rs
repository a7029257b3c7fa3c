//! # tramo-broker
//!
//! Route-advisory broker binary: loads settings, starts logging and metrics,
//! and serves the WebSocket endpoint until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tramo_settings::{IdentityMode, TramoSettings};
use tramo_server::config::ServerConfig;
use tramo_server::server::TramoServer;

/// Tramo route-advisory broker.
#[derive(Parser, Debug)]
#[command(name = "tramo-broker", about = "Route-advisory WebSocket broker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Client identity: `address_port` or `address` (overrides settings).
    #[arg(long)]
    identity: Option<IdentityMode>,

    /// Settings file (defaults to `$TRAMO_SETTINGS` or `~/.tramo/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags win over file and environment values.
    fn apply(&self, settings: &mut TramoSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(identity) = self.identity {
            settings.broker.identity = identity;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args
        .settings
        .clone()
        .unwrap_or_else(tramo_settings::settings_path);
    let mut settings = tramo_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    if settings.logging.json {
        tramo_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        tramo_core::logging::init_subscriber(&settings.logging.level);
    }

    let metrics = tramo_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings);
    let bind = format!("{}:{}", config.host, config.port);
    let server = TramoServer::new(config).with_metrics(metrics);
    let (addr, serve) = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(%addr, settings = %path.display(), "tramo-broker ready");

    shutdown_signal().await?;
    info!("shutdown signal received");
    server.shutdown().graceful_shutdown(None).await;
    serve.await.context("Server task failed")?;
    info!("tramo-broker stopped");
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok(())
}
