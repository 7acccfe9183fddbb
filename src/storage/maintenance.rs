use super::retention::{RetentionManager, RetentionStats};
use super::traits::LogTarget;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Result of one rotate-then-retain pass. Failures are already logged.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub rotated: bool,
    pub retention: Option<RetentionStats>,
}

/// Rotate the active file if it is stale, then apply retention.
///
/// Neither failure stops the other step or the service; both are retried on
/// the next pass.
pub async fn run_maintenance_pass(
    store: &dyn LogTarget,
    retention: &RetentionManager,
    now: DateTime<Utc>,
) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    match store.rotate(now).await {
        Ok(rotated) => report.rotated = rotated,
        Err(e) => error!(error = %e, "Failed to rotate log file"),
    }

    let manager = retention.clone();
    match tokio::task::spawn_blocking(move || manager.run(now)).await {
        Ok(Ok(stats)) => {
            if !stats.deleted.is_empty() {
                info!(deleted = stats.deleted.len(), "Deleted expired log files");
            }
            report.retention = Some(stats);
        }
        Ok(Err(e)) => error!(error = %e, "Failed to delete old log files"),
        Err(e) => error!(error = %e, "Retention task join error"),
    }

    report
}

/// Time until the next UTC midnight, so daily passes land right after the
/// day boundary instead of drifting with the process start time.
fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    let midnight = tomorrow.and_time(chrono::NaiveTime::MIN).and_utc();
    (midnight - now).to_std().unwrap_or(Duration::ZERO)
}

/// Resolve once `stop` reads true or its sender is gone.
pub async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|&v| v).await;
}

/// Run a maintenance pass now, then on every tick until `stop` flips to true.
///
/// The first scheduled tick is whichever comes first of `interval` and the
/// next UTC midnight.
pub fn spawn_maintenance_task(
    store: Arc<dyn LogTarget>,
    retention: RetentionManager,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            horizon_secs = retention.horizon().as_secs(),
            "Starting log maintenance task"
        );
        run_maintenance_pass(store.as_ref(), &retention, Utc::now()).await;

        let first = interval.min(until_next_midnight(Utc::now()));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + first, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_maintenance_pass(store.as_ref(), &retention, Utc::now()).await;
                }
                _ = stopped(&mut stop) => {
                    info!("Log maintenance task stopping");
                    break;
                }
            }
        }
    })
}
