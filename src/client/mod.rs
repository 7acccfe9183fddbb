//! Producer-side delivery of log lines to an ingest server.
//!
//! Calls to [`DeliveryClient::log`] never wait on the network: lines are
//! either queued straight to a delivery worker (immediate mode) or collected
//! in a buffer that a timer flushes as one batch (buffered mode). A single
//! worker sends batches one at a time, so a client's batches reach the
//! server in the order they were submitted. Batches that cannot be delivered
//! are logged at `error` with their contents and handed to the failure
//! channel. The worker's queue and the buffer are both bounded: a batch that
//! finds the queue full is dropped through the same loss path.

pub mod retry;
pub mod tail;
pub mod transport;

pub use retry::{DeliveryError, RetryPolicy};
pub use tail::TailClient;
pub use transport::{HttpTransport, Transport, TransportError};

use crate::ingest::IngestPayload;
use crate::storage::stopped;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const FAILURE_QUEUE_CAPACITY: usize = 64;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_MAX_BUFFERED_LINES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every `log` call is sent as its own batch.
    Immediate,
    /// Lines accumulate and are sent as one batch every `flush_interval`.
    Buffered { flush_interval: Duration },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub api_key: String,
    pub mode: DeliveryMode,
    pub retry: RetryPolicy,
    /// Per-request timeout.
    pub timeout: Duration,
    /// When set, batches use the labeled wire form.
    pub source: Option<String>,
    /// Batches waiting for the delivery worker.
    pub queue_capacity: usize,
    /// Buffered mode flushes early once this many lines are waiting.
    pub max_buffered_lines: usize,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            mode: DeliveryMode::Immediate,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(10),
            source: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_buffered_lines: DEFAULT_MAX_BUFFERED_LINES,
        }
    }

    pub fn buffered(mut self, flush_interval: Duration) -> Self {
        self.mode = DeliveryMode::Buffered { flush_interval };
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_max_buffered_lines(mut self, lines: usize) -> Self {
        self.max_buffered_lines = lines.max(1);
        self
    }
}

/// A batch that was dropped after delivery failed for good.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub lines: Vec<String>,
    pub error: DeliveryError,
}

enum Command {
    Deliver(Vec<String>),
    Barrier(oneshot::Sender<()>),
}

struct Inner {
    mode: DeliveryMode,
    max_buffered_lines: usize,
    buffer: Mutex<Vec<String>>,
    commands: mpsc::Sender<Command>,
    failures: mpsc::Sender<DeliveryFailure>,
}

impl Inner {
    fn enqueue(&self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        match self.commands.try_send(Command::Deliver(lines)) {
            Ok(()) => {}
            Err(TrySendError::Full(Command::Deliver(lines))) => {
                let error = DeliveryError::QueueFull;
                error!(
                    error = %error,
                    count = lines.len(),
                    lines = ?lines,
                    "Dropping log batch, delivery queue full"
                );
                report_failure(&self.failures, DeliveryFailure { lines, error });
            }
            Err(TrySendError::Closed(Command::Deliver(lines))) => {
                error!(lines = ?lines, "Delivery worker is gone, dropping log batch");
            }
            Err(_) => {}
        }
    }

    /// Swap the buffer for an empty one and queue what was in it.
    ///
    /// The send happens under the buffer lock so concurrent flushes queue
    /// their batches in the order they were captured.
    fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = std::mem::take(&mut *buffer);
        self.enqueue(batch);
    }

    fn log_batch(&self, lines: Vec<String>) {
        match self.mode {
            DeliveryMode::Immediate => self.enqueue(lines),
            DeliveryMode::Buffered { .. } => {
                let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                buffer.extend(lines);
                if buffer.len() >= self.max_buffered_lines {
                    let batch = std::mem::take(&mut *buffer);
                    self.enqueue(batch);
                }
            }
        }
    }
}

/// Client that ships log lines to `POST /log`.
///
/// Must be created inside a tokio runtime; the delivery worker and the flush
/// timer are spawned onto it.
pub struct DeliveryClient {
    inner: Arc<Inner>,
    failures: Mutex<Option<mpsc::Receiver<DeliveryFailure>>>,
    stop_tx: watch::Sender<bool>,
    flusher: Option<JoinHandle<()>>,
}

impl DeliveryClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config.url, &config.api_key, config.timeout)?;
        info!(endpoint = transport.endpoint(), mode = ?config.mode, "Starting log delivery client");
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a client over any transport. `config.url`, `config.api_key` and
    /// `config.timeout` are only used by [`DeliveryClient::new`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::channel(FAILURE_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            mode: config.mode,
            max_buffered_lines: config.max_buffered_lines.max(1),
            buffer: Mutex::new(Vec::new()),
            commands: command_tx,
            failures: failure_tx.clone(),
        });

        tokio::spawn(run_worker(
            transport,
            config.retry,
            config.source,
            command_rx,
            failure_tx,
        ));

        let flusher = match config.mode {
            DeliveryMode::Buffered { flush_interval } => Some(tokio::spawn(run_flusher(
                inner.clone(),
                flush_interval,
                stop_rx,
            ))),
            DeliveryMode::Immediate => None,
        };

        Self {
            inner,
            failures: Mutex::new(Some(failure_rx)),
            stop_tx,
            flusher,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.inner.mode
    }

    /// Log one line.
    pub fn log(&self, line: impl Into<String>) {
        self.inner.log_batch(vec![line.into()]);
    }

    /// Log several lines; they stay together and in order.
    pub fn log_batch<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .log_batch(lines.into_iter().map(Into::into).collect());
    }

    /// Queue whatever is buffered for delivery without waiting for it.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Flush, then wait until every batch queued so far has been delivered
    /// or given up on.
    pub async fn flush_and_wait(&self) {
        self.inner.flush();
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.commands.send(Command::Barrier(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Receiver for batches dropped after delivery failed. Only the first
    /// call gets it. Failures are logged whether or not anyone listens.
    pub fn failures(&self) -> Option<mpsc::Receiver<DeliveryFailure>> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stop the flush timer, deliver everything still buffered, and shut the
    /// worker down.
    pub async fn close(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(flusher) = self.flusher.take() {
            let _ = flusher.await;
        }
        self.flush_and_wait().await;
        debug!("Log delivery client closed");
    }
}

impl Drop for DeliveryClient {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        // The worker drains its queue before exiting, so buffered lines
        // still go out as long as the runtime is alive.
        self.inner.flush();
    }
}

/// Each write is logged as one line; a single trailing newline is dropped.
/// Writes never fail.
impl io::Write for DeliveryClient {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let line = text.strip_suffix('\n').unwrap_or(&text);
        self.log(line);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush();
        Ok(())
    }
}

async fn run_flusher(inner: Arc<Inner>, flush_interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + flush_interval,
        flush_interval,
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => inner.flush(),
            _ = stopped(&mut stop) => break,
        }
    }
}

async fn run_worker(
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    source: Option<String>,
    mut commands: mpsc::Receiver<Command>,
    failures: mpsc::Sender<DeliveryFailure>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Deliver(lines) => {
                deliver(transport.as_ref(), &policy, source.as_deref(), lines, &failures).await
            }
            Command::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Log delivery worker stopped");
}

async fn deliver(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    source: Option<&str>,
    lines: Vec<String>,
    failures: &mpsc::Sender<DeliveryFailure>,
) {
    let payload = match source {
        Some(source) => IngestPayload::Labeled {
            source: source.to_string(),
            logs: lines,
        },
        None => IngestPayload::Lines(lines),
    };

    match policy.run(|| transport.send(&payload)).await {
        Ok(()) => debug!(lines = payload.lines().len(), "Delivered log batch"),
        Err(error) => {
            error!(
                error = %error,
                count = payload.lines().len(),
                lines = ?payload.lines(),
                "Dropping log batch after failed delivery"
            );
            let (_, lines) = payload.into_parts();
            report_failure(failures, DeliveryFailure { lines, error });
        }
    }
}

fn report_failure(failures: &mpsc::Sender<DeliveryFailure>, failure: DeliveryFailure) {
    if failures.try_send(failure).is_err() {
        debug!("Failure channel full or unclaimed");
    }
}
