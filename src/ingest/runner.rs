use super::api::IngestState;
use super::auth::ApiKey;
use super::payload::TailRecord;
use super::server::{router, serve};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::storage::{
    spawn_maintenance_task, stopped, LogStore, LogTarget, RetentionManager, StorageError,
};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Build identifier reported by `/version`.
pub fn build_version() -> &'static str {
    option_env!("SLS_BUILD_ID").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// The ingestion service: one log store, one broadcaster, and the periodic
/// rotation/retention task, all owned here and handed to the HTTP layer.
pub struct IngestService {
    store: Arc<LogStore>,
    broadcaster: Broadcaster<TailRecord>,
    retention: RetentionManager,
    api_key: ApiKey,
    check_interval: Duration,
    shutdown_timeout: Duration,
    max_body_bytes: usize,
}

impl IngestService {
    pub fn open(config: &Config) -> Result<Self, ServiceError> {
        info!(dir = %config.storage.dir.display(), "Opening log store");
        let store = Arc::new(LogStore::open(&config.storage.dir)?);

        Ok(Self {
            store,
            broadcaster: Broadcaster::new(config.tail.queue_capacity),
            retention: RetentionManager::new(&config.storage.dir, config.retention.horizon()),
            api_key: ApiKey::new(&config.auth.api_key),
            check_interval: config.retention.check_interval,
            shutdown_timeout: config.server.shutdown_timeout,
            max_body_bytes: config.server.max_body_bytes,
        })
    }

    pub fn store(&self) -> Arc<LogStore> {
        self.store.clone()
    }

    pub fn broadcaster(&self) -> Broadcaster<TailRecord> {
        self.broadcaster.clone()
    }

    pub fn router(&self) -> Router {
        let state = IngestState {
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            version: Arc::from(build_version()),
        };
        router(state, self.api_key.clone(), self.max_body_bytes)
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// On shutdown: tail streams are ended, in-flight requests get
    /// `shutdown_timeout` to finish, the maintenance task stops, and the
    /// active file is closed.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let maintenance = spawn_maintenance_task(
            self.store.clone() as Arc<dyn LogTarget>,
            self.retention.clone(),
            self.check_interval,
            stop_rx.clone(),
        );

        // Fires once the caller's shutdown future resolves.
        let signal_tx = stop_tx.clone();
        tokio::spawn(async move {
            shutdown.await;
            let _ = signal_tx.send(true);
        });

        let broadcaster = self.broadcaster.clone();
        let mut server_stop = stop_rx.clone();
        let graceful = async move {
            stopped(&mut server_stop).await;
            info!("Shutting down ingest server");
            // Open tails would otherwise hold the graceful shutdown forever.
            let closed = broadcaster.close_all();
            info!(subscribers = closed, "Closed tail subscriptions");
        };

        let app = self.router();
        let mut server = tokio::spawn(serve(listener, app, graceful));
        let mut wait_stop = stop_rx;

        let served = tokio::select! {
            result = &mut server => Some(result),
            _ = stopped(&mut wait_stop) => None,
        };

        let result = match served {
            Some(result) => result,
            None => match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "In-flight requests did not finish in time, aborting"
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            },
        };

        let _ = stop_tx.send(true);
        if let Err(e) = maintenance.await {
            error!(error = %e, "Maintenance task join error");
        }

        self.store.close().await?;
        info!("Ingest service stopped");

        match result {
            Ok(served) => served.map_err(ServiceError::Server),
            Err(e) => Err(ServiceError::Server(std::io::Error::other(e))),
        }
    }
}
