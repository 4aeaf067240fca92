//! # wsrelay
//!
//! WebSocket broadcast relay binary: loads settings, installs logging and
//! metrics, then serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use wsrelay_server::RelayServer;
use wsrelay_settings::{
    LoggingSettings, RelaySettings, load_settings, load_settings_from_path, settings_path,
};
use wsrelay_telemetry::{TelemetryConfig, init_telemetry, parse_level};

/// WebSocket broadcast relay.
#[derive(Parser, Debug)]
#[command(name = "wsrelay", version, about = "WebSocket broadcast relay")]
struct Cli {
    /// Settings file (defaults to `~/.wsrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Command-line flags win over file and environment.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

/// Telemetry setup from the `logging` settings section.
fn telemetry_config(logging: &LoggingSettings) -> Result<TelemetryConfig> {
    let mut config = TelemetryConfig::from_level(&logging.level, logging.json)
        .context("invalid logging.level")?;
    for (target, level) in &logging.modules {
        let level =
            parse_level(level).with_context(|| format!("invalid logging.modules.{target}"))?;
        config = config.with_module_level(target, level);
    }
    if let Some(path) = &logging.file {
        config = config.with_file(path);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .with_context(|| {
        let path = cli.config.clone().unwrap_or_else(settings_path);
        format!("failed to load settings from {}", path.display())
    })?;
    cli.apply(&mut settings);

    let telemetry = telemetry_config(&settings.logging)?;
    init_telemetry(&telemetry).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %settings.server.host,
        port = settings.server.port,
        path = %settings.server.path,
        "starting wsrelay"
    );

    let metrics = wsrelay_server::metrics::install_recorder()
        .context("failed to install metrics recorder")?;
    let handle = RelayServer::new(&settings)
        .with_metrics(metrics)
        .listen()
        .await
        .context("failed to start server")?;
    info!(addr = %handle.local_addr(), "wsrelay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
