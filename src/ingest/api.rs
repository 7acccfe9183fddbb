use super::payload::{IngestPayload, TailRecord};
use crate::broadcast::Broadcaster;
use crate::storage::{LogTarget, StorageError};
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};

/// Shared state behind the HTTP handlers.
#[derive(Clone)]
pub struct IngestState {
    pub store: Arc<dyn LogTarget>,
    pub broadcaster: Broadcaster<TailRecord>,
    pub version: Arc<str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailFormat {
    #[default]
    Raw,
    Json,
}

#[derive(Debug, Default, Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    pub format: TailFormat,
}

/// GET /health
pub async fn health() -> &'static str {
    debug!("Health checked");
    "OK"
}

/// GET /version
pub async fn version(State(state): State<IngestState>) -> String {
    debug!("Version checked");
    state.version.to_string()
}

/// POST /log
///
/// Decode, append to disk, then publish to tails. Once the append succeeded
/// the request succeeds; tail delivery is best-effort.
pub async fn post_log(
    State(state): State<IngestState>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let payload = IngestPayload::decode(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let (source, lines) = payload.into_parts();

    if let Err(e) = state.store.append(&lines).await {
        error!(error = %e, lines = lines.len(), "Failed to append log batch");
        return Err(ApiError::Storage(e));
    }

    let records = TailRecord::from_batch(source.as_deref(), &lines);
    let report = state.broadcaster.publish_all(&records);
    debug!(
        lines = lines.len(),
        source = source.as_deref().unwrap_or("-"),
        subscribers = report.delivered,
        dropped = report.dropped,
        "Wrote log batch"
    );

    Ok("OK")
}

/// GET /log
///
/// Streams every published line until the client goes away. The response
/// body owns the subscription, so a disconnect drops it and unsubscribes.
pub async fn tail_log(
    State(state): State<IngestState>,
    Query(query): Query<TailQuery>,
) -> Response {
    let subscription = state.broadcaster.subscribe();
    debug!(subscriber_id = subscription.id(), format = ?query.format, "Tailing logs");

    let format = query.format;
    let lines = subscription.into_stream().filter_map(move |record| async move {
        let line = match format {
            TailFormat::Raw => record.to_raw_line(),
            TailFormat::Json => match record.to_json_line() {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to encode tail record");
                    return None;
                }
            },
        };
        Some(Ok::<_, Infallible>(line))
    });

    let content_type = match format {
        TailFormat::Raw => "text/plain; charset=utf-8",
        TailFormat::Json => "application/x-ndjson",
    };

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}

/// Anything else on /log looks like an unknown route.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Storage(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        }
    }
}
