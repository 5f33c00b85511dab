//! # gamehub
//!
//! Game telemetry hub binary: loads settings, starts the HTTP/WebSocket
//! server, and shuts down cleanly on SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use gamehub_core::logging::{LogFormat, init_subscriber};
use gamehub_server::config::ServerConfig;
use gamehub_server::server::GameHubServer;
use gamehub_server::shutdown::DrainOutcome;
use gamehub_settings::HubSettings;

/// Game telemetry hub.
#[derive(Parser, Debug)]
#[command(name = "gamehub", about = "Game telemetry WebSocket hub")]
struct Cli {
    /// Settings file (defaults to `~/.gamehub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("gamehub exiting: {e:#}");
            eprintln!("gamehub: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(gamehub_settings::settings_path);
    let mut settings = gamehub_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);
    install_panic_hook();

    let mut server = GameHubServer::new(ServerConfig::from(&settings.server));
    match gamehub_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("gamehub listening on ws://{addr}/ws");

    shutdown_signal().await?;

    tracing::info!(
        clients = server.registry().connection_count(),
        "Shutting down..."
    );
    if let DrainOutcome::TimedOut { remaining } = server.graceful_shutdown(handle).await {
        tracing::warn!(remaining, "some connections did not close before the shutdown timeout");
    }
    tracing::info!(
        total_events = server.stats().total_events(),
        "Shutdown complete"
    );
    Ok(())
}

/// Log the panic through tracing, then exit with status 1.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "unrecoverable fault");
        default_hook(info);
        std::process::exit(1);
    }));
}

/// Resolve on SIGINT or (on unix) SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}
