//! Watermark-delayed merging of out-of-order records.
//!
//! A [`Rectifier`] collects records from any number of producers, keeps them
//! ordered by their sort key, and releases them once virtual time has moved
//! far enough past them:
//!
//! ```text
//! cutoff = virtual_ts - accumulation_time
//! ```
//!
//! Every `send_interval` the records with a key `<= cutoff` are handed to
//! the [`RecordSink`] in ascending order. The sink reports how many it
//! consumed; the rest stay at the head of the buffer for the next flush.
//!
//! Any jitter smaller than the accumulation window is absorbed. A record
//! that arrives after the cutoff has already passed its key is a straggler
//! and is handled according to [`StragglerPolicy`].

mod accumulator;
mod record;
mod sink;

pub use accumulator::{Accumulator, Entry, StreamStats};
pub use record::{EventRecord, STREAM_ID_FIELD};
pub use sink::{CallbackSink, ChannelSink, MemorySink, RecordSink};

use crate::clock::Clock;
use crate::config::{RectifierConfig, StragglerPolicy};
use crate::error::{Error, Result};
use crate::observability::{RectifierMetrics, span_flush, span_rectifier};
use crate::temporal::{TimeRange, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Records with a key up to this were eligible.
    pub cutoff: Timestamp,
    /// Records offered to the sink.
    pub offered: usize,
    /// Records the sink consumed.
    pub consumed: usize,
    /// Records held after the flush.
    pub remaining: usize,
}

/// Reordering buffer between producers and a [`RecordSink`].
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct Rectifier {
    inner: Arc<Inner>,
}

struct State {
    accumulator: Accumulator,
    last_cutoff: Option<Timestamp>,
}

struct Inner {
    name: String,
    config: RectifierConfig,
    time: Arc<dyn Clock>,
    sink: Arc<dyn RecordSink>,
    state: Mutex<State>,
    /// Serializes flushes so at most one sink call is in flight.
    flush_lock: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: RectifierMetrics,
}

impl Rectifier {
    /// Create a rectifier reading virtual time from `time`.
    pub fn new(
        config: RectifierConfig,
        time: Arc<dyn Clock>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        Self::named("default", config, time, sink)
    }

    /// Create a rectifier with a name used in logs and metric labels.
    pub fn named(
        name: &str,
        config: RectifierConfig,
        time: Arc<dyn Clock>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                config,
                time,
                sink,
                state: Mutex::new(State {
                    accumulator: Accumulator::new(),
                    last_cutoff: None,
                }),
                flush_lock: tokio::sync::Mutex::new(()),
                stopped: AtomicBool::new(false),
                shutdown: Arc::new(Notify::new()),
                task: Mutex::new(None),
                metrics: RectifierMetrics::new(name),
            }),
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &RectifierConfig {
        &self.inner.config
    }

    /// Accept a record.
    ///
    /// Fails when the sort field is missing or unusable, or when the record
    /// is a straggler and stragglers are rejected.
    pub fn add(&self, record: EventRecord) -> Result<()> {
        let inner = &self.inner;
        let field = &inner.config.sort_field;
        let key = record
            .sort_key(field)
            .ok_or_else(|| Error::MissingSortField(field.clone()))?;
        let stream = record.stream_id().unwrap_or_default().to_string();

        let mut state = inner.state.lock();
        if let Some(cutoff) = state.last_cutoff.filter(|cutoff| key < *cutoff) {
            inner.metrics.record_straggler(&stream);
            match inner.config.straggler_policy {
                StragglerPolicy::Reject => {
                    tracing::debug!(
                        rectifier = %inner.name,
                        stream = %stream,
                        key = %key,
                        cutoff = %cutoff,
                        "straggler rejected"
                    );
                    return Err(Error::StragglerRejected {
                        key: key.as_millis(),
                        cutoff: cutoff.as_millis(),
                    });
                }
                StragglerPolicy::Accept => {
                    tracing::warn!(
                        rectifier = %inner.name,
                        stream = %stream,
                        key = %key,
                        cutoff = %cutoff,
                        "straggler accepted"
                    );
                }
            }
        }
        state.accumulator.insert(key, record);
        inner.metrics.record_added(&stream, state.accumulator.len());
        Ok(())
    }

    /// Run one flush now.
    pub async fn flush(&self) -> Result<FlushReport> {
        self.inner.flush().await
    }

    /// Spawn the periodic flush task. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped("rectifier"));
        }
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(Error::AlreadyRunning("rectifier"));
        }
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let interval = self.inner.config.send_interval();
        let span = span_rectifier(&self.inner.name);
        *task = Some(tokio::spawn(
            run_flushes(weak, shutdown, interval).instrument(span),
        ));
        tracing::info!(
            rectifier = %self.inner.name,
            send_interval_ms = interval.as_millis() as u64,
            accumulation_ms = self.inner.config.accumulation_time_millis,
            "flush task started"
        );
        Ok(())
    }

    /// Stop flushing for good.
    ///
    /// Waits for an in-flight sink call to settle; no sink call happens after
    /// this returns. Held records are discarded with the rectifier.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        let first = !inner.stopped.swap(true, Ordering::AcqRel);
        inner.shutdown.notify_one();

        let _flush = inner.flush_lock.lock().await;
        let task = inner.task.lock().take();
        if let Some(task) = task {
            task.abort();
            match task.await {
                Err(e) if e.is_panic() => {
                    tracing::error!(rectifier = %inner.name, "flush task panicked");
                }
                Err(e) if !e.is_cancelled() => {
                    tracing::warn!(rectifier = %inner.name, error = %e, "flush task failed");
                }
                _ => {}
            }
        }
        if first {
            tracing::info!(
                rectifier = %inner.name,
                pending = inner.state.lock().accumulator.len(),
                "rectifier destroyed"
            );
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Whether the flush task is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Number of held records.
    pub fn len(&self) -> usize {
        self.inner.state.lock().accumulator.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().accumulator.is_empty()
    }

    /// Cutoff of the most recent flush.
    pub fn last_cutoff(&self) -> Option<Timestamp> {
        self.inner.state.lock().last_cutoff
    }

    /// Smallest and largest held key.
    pub fn range(&self) -> Option<TimeRange> {
        self.inner.state.lock().accumulator.range()
    }

    /// Held records per stream id.
    pub fn stream_stats(&self) -> BTreeMap<String, StreamStats> {
        self.inner.state.lock().accumulator.stream_stats()
    }
}

impl Inner {
    async fn flush(&self) -> Result<FlushReport> {
        let _flush = self.flush_lock.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped("rectifier"));
        }

        let cutoff = self
            .time
            .now()
            .saturating_sub_millis(self.config.accumulation_millis());
        let entries = {
            let mut state = self.state.lock();
            state.last_cutoff = Some(cutoff);
            state.accumulator.take_eligible(cutoff)
        };
        let (keys, records): (Vec<Timestamp>, Vec<EventRecord>) =
            entries.into_iter().map(|e| (e.key, e.record)).unzip();
        let offered = records.len();

        let consumed = self
            .sink
            .deliver(&records)
            .instrument(span_flush(&self.name, cutoff.as_millis()))
            .await;
        if consumed > offered {
            tracing::warn!(
                rectifier = %self.name,
                consumed,
                offered,
                "sink reported more records than offered"
            );
        }
        let consumed = consumed.min(offered);

        let remaining = {
            let mut state = self.state.lock();
            if consumed < offered {
                let unconsumed = keys
                    .into_iter()
                    .zip(records)
                    .skip(consumed)
                    .map(|(key, record)| Entry { key, record })
                    .collect();
                state.accumulator.restore(unconsumed);
            }
            state.accumulator.len()
        };

        self.metrics.record_flush(offered, consumed, remaining);
        tracing::trace!(
            rectifier = %self.name,
            cutoff = %cutoff,
            offered,
            consumed,
            remaining,
            "flushed"
        );
        Ok(FlushReport {
            cutoff,
            offered,
            consumed,
            remaining,
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_flushes(rectifier: Weak<Inner>, shutdown: Arc<Notify>, interval: Duration) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = rectifier.upgrade() else {
            break;
        };
        if let Err(e) = inner.flush().await {
            tracing::debug!(error = %e, "flush loop exiting");
            break;
        }
    }
}

impl std::fmt::Debug for Rectifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rectifier")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("last_cutoff", &self.last_cutoff())
            .finish()
    }
}
