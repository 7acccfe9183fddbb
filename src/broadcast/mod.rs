//! In-process fan-out of ingested lines to live tail subscribers.
//!
//! Every subscriber owns a bounded queue of batches; a published batch takes
//! one slot however many items it holds, so a batch reaches each subscriber
//! whole or not at all. Publishing never waits on a queue: a subscriber whose
//! queue is full, or whose receiving side is gone, is removed from the table
//! on the spot and observes end-of-stream once it has drained what was
//! already queued.

use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Counts from a single publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct Subscriber<T> {
    tx: mpsc::Sender<Arc<[T]>>,
}

struct Table<T> {
    next_id: u64,
    closed: bool,
    subscribers: HashMap<u64, Subscriber<T>>,
}

struct Shared<T> {
    capacity: usize,
    table: Mutex<Table<T>>,
}

impl<T> Shared<T> {
    // The table holds no invariants a panicking holder could break halfway.
    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }
}

/// Publish/subscribe registry. Cloning yields another handle to the same table.
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                table: Mutex::new(Table {
                    next_id: 0,
                    closed: false,
                    subscribers: HashMap::new(),
                }),
            }),
        }
    }

    /// Register a new subscriber under the next id.
    ///
    /// After [`close_all`](Self::close_all) the returned subscription is
    /// already at end-of-stream.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let mut table = self.shared.lock();
        table.next_id += 1;
        let id = table.next_id;
        if !table.closed {
            table.subscribers.insert(id, Subscriber { tx });
        }
        drop(table);

        tracing::debug!(subscriber_id = id, "Tail subscriber registered");
        Subscription {
            id,
            rx,
            current: None,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Deliver one item to every open subscriber.
    pub fn publish(&self, item: T) -> PublishReport {
        self.publish_all(std::slice::from_ref(&item))
    }

    /// Deliver a batch to every open subscriber as one queue entry, under one
    /// lock so concurrent batches never interleave within a subscriber's stream.
    pub fn publish_all(&self, items: &[T]) -> PublishReport {
        let mut report = PublishReport::default();
        if items.is_empty() {
            return report;
        }

        let batch: Arc<[T]> = Arc::from(items);
        let mut table = self.shared.lock();
        table.subscribers.retain(|&id, subscriber| {
            match subscriber.tx.try_send(batch.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = id, "Tail subscriber queue full, dropping subscriber");
                    report.dropped += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber_id = id, "Tail subscriber gone, removing");
                    report.dropped += 1;
                    false
                }
            }
        });

        report
    }

    /// Drop every subscriber and refuse new ones. Subscribers drain what is
    /// queued and then see end-of-stream.
    pub fn close_all(&self) -> usize {
        let mut table = self.shared.lock();
        table.closed = true;
        let count = table.subscribers.len();
        table.subscribers.clear();
        count
    }
}

/// Receiving side of one subscriber. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<Arc<[T]>>,
    /// Batch being handed out item by item, and the next index in it.
    current: Option<(Arc<[T]>, usize)>,
    shared: Weak<Shared<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T: Clone> Subscription<T> {
    fn next_buffered(&mut self) -> Option<T> {
        let (batch, next) = self.current.as_mut()?;
        if let Some(item) = batch.get(*next).cloned() {
            *next += 1;
            return Some(item);
        }
        self.current = None;
        None
    }

    /// Next item, or `None` once the subscriber has been removed and its
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.next_buffered() {
                return Some(item);
            }
            let batch = self.rx.recv().await?;
            self.current = Some((batch, 0));
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.next_buffered() {
                return Some(item);
            }
            let batch = self.rx.try_recv().ok()?;
            self.current = Some((batch, 0));
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            if shared.remove(self.id) {
                tracing::debug!(subscriber_id = self.id, "Tail subscriber disconnected");
            }
        }
    }
}
