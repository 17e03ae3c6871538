//! # shiftwatch
//!
//! Presence and liveness server binary: loads settings, opens the incident
//! store and serves client channels until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use shiftwatch_server::{ServerConfig, ShutdownCoordinator};
use shiftwatch_settings::Settings;
use shiftwatch_store::Database;
use shiftwatch_telemetry::TelemetryConfig;

/// Shiftwatch presence server.
#[derive(Parser, Debug)]
#[command(name = "shiftwatch", about = "Presence and liveness tracking for remote workers")]
struct Cli {
    /// Settings file (defaults to `~/.shiftwatch/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` incident store.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl Cli {
    /// Layer the command-line flags over the file and `lookup`-provided variables.
    fn load_settings(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<Settings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(shiftwatch_settings::settings_path);
        let mut settings = shiftwatch_settings::load_settings_with(&path, lookup)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            settings.storage.db_path.clone_from(db_path);
        }
        Ok(settings)
    }
}

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings(|name| std::env::var(name).ok())?;

    let _ = shiftwatch_telemetry::init_telemetry(&TelemetryConfig {
        log_level: settings.logging.level.clone(),
        json: settings.logging.json,
    });

    let db_path = settings.storage.db_path.clone();
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let schema = db.schema_version().context("Failed to read schema version")?;
    tracing::debug!(path = %db.path().display(), ?schema, "store opened");

    let coordinator = ShutdownCoordinator::new();
    let config = ServerConfig::from_settings(&settings);
    let handle = shiftwatch_server::start(config, db, coordinator.token())
        .await
        .context("Failed to start server")?;

    tracing::info!(port = handle.port, db = %db_path.display(), "shiftwatch ready");

    for task in handle.into_tasks() {
        coordinator.track(task);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    coordinator.graceful_shutdown(Some(SHUTDOWN_TIMEOUT)).await;
    Ok(())
}
