use super::transport::TransportError;
use crate::ingest::{TailFormat, API_KEY_HEADER};
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::time::Duration;

/// Follows `GET /log` on an ingest server.
#[derive(Debug, Clone)]
pub struct TailClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

struct LineState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buf: Vec<u8>,
    done: bool,
}

impl TailClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, TransportError> {
        // No overall timeout: the response never finishes on its own.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/log", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    /// Connect and stream lines, without their terminators, until the server
    /// ends the response.
    pub async fn lines(
        &self,
        format: TailFormat,
    ) -> Result<impl Stream<Item = Result<String, TransportError>> + Send + 'static, TransportError>
    {
        let url = match format {
            TailFormat::Raw => self.endpoint.clone(),
            TailFormat::Json => format!("{}?format=json", self.endpoint),
        };

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let state = LineState {
            body: response.bytes_stream().boxed(),
            buf: Vec::new(),
            done: false,
        };

        Ok(stream::unfold(state, |mut state| async move {
            loop {
                if let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = state.buf.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line[..pos]).into_owned();
                    return Some((Ok(text), state));
                }

                if state.done {
                    if state.buf.is_empty() {
                        return None;
                    }
                    let text = String::from_utf8_lossy(&state.buf).into_owned();
                    state.buf.clear();
                    return Some((Ok(text), state));
                }

                match state.body.next().await {
                    Some(Ok(chunk)) => state.buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(TransportError::Http(e)), state));
                    }
                    None => state.done = true,
                }
            }
        }))
    }
}
