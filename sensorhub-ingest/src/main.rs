//! sensorhub-ingest - telemetry ingestion service
//!
//! Accepts sensor readings over HTTP, validates them against the tenant's
//! registered schema, grows the reading table as schemas grow, and keeps
//! threshold alerts up to date.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sensorhub_common::config::{resolve_root_folder, Settings, ROOT_FOLDER_ENV};
use sensorhub_common::db::init::init_database_with;
use sensorhub_common::Ingestor;
use sensorhub_ingest::{build_router, AppState};
use tokio::signal;
use tracing::{error, info};

/// Command-line arguments for sensorhub-ingest
#[derive(Parser, Debug)]
#[command(name = "sensorhub-ingest")]
#[command(about = "Telemetry ingestion service for sensorhub")]
#[command(version)]
struct Args {
    /// Data root folder (database lives here)
    #[arg(short, long)]
    root_folder: Option<String>,

    /// TOML config file (default: ~/.config/sensorhub/config.toml, then /etc/sensorhub/config.toml)
    #[arg(short, long, env = "SENSORHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides bind_address from the config file
    #[arg(short, long, env = "SENSORHUB_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting sensorhub-ingest v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref()).context("Failed to load configuration")?;
    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, &settings);
    info!("Root folder: {}", root_folder.display());

    let db_path = settings.database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = match init_database_with(&db_path, &settings.database_options()).await {
        Ok(pool) => {
            info!("✓ Database ready");
            pool
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return Err(e.into());
        }
    };

    let ingestor = Ingestor::new(pool).with_conflict_retries(settings.migration_lock_retries);
    let app = build_router(AppState::new(ingestor, settings.default_deadline_ms));

    let bind = args.bind.unwrap_or_else(|| settings.bind_address.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("sensorhub-ingest listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
