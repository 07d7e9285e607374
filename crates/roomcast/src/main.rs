//! # roomcast
//!
//! Hub server binary: loads settings, starts logging and metrics, builds the
//! hub and serves it over `WebSocket` until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use roomcast_core::HubBuilder;
use roomcast_core::logging::{init_json_subscriber, init_subscriber};
use roomcast_server::RoomcastServer;
use roomcast_settings::HubSettings;

/// roomcast hub server.
#[derive(Parser, Debug)]
#[command(name = "roomcast", about = "Real-time group and room messaging hub")]
struct Cli {
    /// Settings file (defaults to `~/.roomcast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<HubSettings> {
        let mut settings = match &self.config {
            Some(path) => roomcast_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => roomcast_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        init_json_subscriber(&cli.log_level);
    } else {
        init_subscriber(&cli.log_level);
    }

    let settings = cli.load_settings()?;
    tracing::info!(
        environment = %settings.auth.environment,
        fallback = ?settings.auth.fallback,
        groups = settings.topology.groups.len(),
        rooms = settings.topology.rooms.len(),
        "settings loaded"
    );

    let hub = HubBuilder::new(settings.clone()).build();
    let mut server = RoomcastServer::new(&settings, hub);
    match roomcast_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(err) => tracing::warn!(error = %err, "metrics recorder unavailable, /metrics disabled"),
    }

    let handle = server.listen().await.context("Failed to bind server")?;
    tracing::info!(addr = %handle.addr(), "roomcast ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    handle.stop().await;
    Ok(())
}
