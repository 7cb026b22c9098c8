//! # marionette
//!
//! Server binary: loads settings, wires the collaborators together, and
//! serves pages and the `WebSocket` gateway until interrupted.

#![deny(unsafe_code)]

mod bootstrap;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use marionette_rpc::default_registry;
use marionette_server::{MarionetteServer, ServerConfig};
use tracing::info;

/// How long open sessions get to close after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Marionette web control layer.
#[derive(Parser, Debug)]
#[command(name = "marionette", about = "Marionette web control layer")]
struct Cli {
    /// Settings file (defaults to `~/.marionette/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(marionette_settings::settings_path);
    let mut settings = marionette_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }

    marionette_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    info!(path = %settings_path.display(), version = %settings.version, "settings loaded");

    let wiring = bootstrap::wire(&settings).await?;
    let server = MarionetteServer::new(
        ServerConfig::from_settings(&settings.server),
        default_registry(),
        wiring.services,
        wiring.connections,
        wiring.pages,
    );

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind listener")?;
    info!(%addr, "marionette ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");
    let _ = server
        .shutdown()
        .drain(handle, server.connections(), SHUTDOWN_GRACE)
        .await;
    Ok(())
}
