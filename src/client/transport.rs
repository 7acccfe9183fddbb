use crate::ingest::{IngestPayload, API_KEY_HEADER};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Connection failures, timeouts and 5xx answers are retried. Anything
    /// else (a 404 from a bad key, a 400 for a rejected body) will fail the
    /// same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => {
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    return true;
                }
                e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            TransportError::Status { status, .. } => (500..600).contains(status),
        }
    }
}

/// Sends one batch to the ingest server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &IngestPayload) -> Result<(), TransportError>;
}

/// `POST {base_url}/log` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/log", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &IngestPayload) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}
