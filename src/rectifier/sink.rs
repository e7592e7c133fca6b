//! Flush destinations.

use super::record::EventRecord;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Receives flushed batches.
///
/// `deliver` is handed the eligible records in ascending order and returns
/// how many of them, counted from the start of the batch, it consumed. The
/// rest are kept and offered again on the next flush. The rectifier never
/// has more than one `deliver` call in flight.
pub trait RecordSink: Send + Sync {
    /// Deliver a batch, which may be empty.
    fn deliver<'a>(&'a self, batch: &'a [EventRecord]) -> BoxFuture<'a, usize>;
}

impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    fn deliver<'a>(&'a self, batch: &'a [EventRecord]) -> BoxFuture<'a, usize> {
        (**self).deliver(batch)
    }
}

/// A sink backed by a synchronous closure.
///
/// # Example
///
/// ```rust
/// use timefront::rectifier::{CallbackSink, EventRecord};
///
/// let sink = CallbackSink::new(|batch: &[EventRecord]| {
///     for record in batch {
///         println!("{:?}", record);
///     }
///     batch.len()
/// });
/// # let _ = sink;
/// ```
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&[EventRecord]) -> usize + Send + Sync,
{
    /// Wrap `callback`.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> RecordSink for CallbackSink<F>
where
    F: Fn(&[EventRecord]) -> usize + Send + Sync,
{
    fn deliver<'a>(&'a self, batch: &'a [EventRecord]) -> BoxFuture<'a, usize> {
        futures::future::ready((self.callback)(batch)).boxed()
    }
}

/// Forwards non-empty batches into a Tokio channel.
///
/// Waits for channel capacity, so a slow receiver delays the next flush.
/// Once the receiver is dropped nothing is consumed any more and records pile
/// up in the rectifier; destroy the rectifier along with the receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Vec<EventRecord>>,
    closed: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<EventRecord>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (sink, receiver)
    }

    /// Whether a delivery has found the receiver gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl RecordSink for ChannelSink {
    fn deliver<'a>(&'a self, batch: &'a [EventRecord]) -> BoxFuture<'a, usize> {
        async move {
            if batch.is_empty() {
                return 0;
            }
            match self.sender.send(batch.to_vec()).await {
                Ok(()) => batch.len(),
                Err(_) => {
                    if !self.closed.swap(true, Ordering::AcqRel) {
                        tracing::warn!(records = batch.len(), "channel sink closed, batches kept");
                    }
                    0
                }
            }
        }
        .boxed()
    }
}

/// Keeps every batch it is offered. Useful in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<EventRecord>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch offered so far, including empty ones.
    pub fn batches(&self) -> Vec<Vec<EventRecord>> {
        self.batches.lock().clone()
    }

    /// Every record received, in delivery order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of `deliver` calls.
    pub fn calls(&self) -> usize {
        self.batches.lock().len()
    }
}

impl RecordSink for MemorySink {
    fn deliver<'a>(&'a self, batch: &'a [EventRecord]) -> BoxFuture<'a, usize> {
        self.batches.lock().push(batch.to_vec());
        futures::future::ready(batch.len()).boxed()
    }
}
