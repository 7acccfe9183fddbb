use crate::config::{load_config, ConfigError, SYSTEM_CONFIG_PATH, USER_CONFIG_PATH};
use crate::ingest::{IngestService, ServiceError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Service(#[from] ServiceError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/{}", USER_CONFIG_PATH);
            eprintln!("  {}", SYSTEM_CONFIG_PATH);
            eprintln!("\nUse --config <path> to specify a config file, or run 'sls config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_service(&config_path).await.map_err(|e| e.into())
}

async fn run_service(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let service = IngestService::open(&config)?;

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .map_err(|source| RunError::Bind {
            addr: config.server.listen.clone(),
            source,
        })?;

    info!(
        listen = %config.server.listen,
        retention_days = config.retention.days,
        "Ingest service started, press Ctrl+C to shutdown"
    );

    service.run(listener, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
