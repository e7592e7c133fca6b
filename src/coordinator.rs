//! One replay run: a virtual clock, a rectifier and the streams feeding them.

use crate::clock::Clock;
use crate::config::{ClockParam, TimefrontConfig};
use crate::error::{Error, Result};
use crate::rectifier::{EventRecord, RecordSink, Rectifier, StreamStats};
use crate::start_time::{CheckpointStore, ResolvedStart, StartTimeSource, resolve_start_time};
use crate::temporal::{TimeRange, Timestamp};
use crate::virtual_time::{EventReceiver, StreamFront, VirtualClock};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Submits records on behalf of one registered stream.
///
/// Every record is tagged with the stream id before it enters the
/// rectifier.
#[derive(Debug, Clone)]
pub struct StreamSubmitter {
    id: Arc<str>,
    rectifier: Rectifier,
}

impl StreamSubmitter {
    /// Stream id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Submit a record.
    pub fn submit(&self, mut record: EventRecord) -> Result<()> {
        record.set_stream_id(&self.id);
        self.rectifier.add(record)
    }

    /// Submit a JSON object.
    pub fn submit_json(&self, value: serde_json::Value) -> Result<()> {
        self.submit(EventRecord::try_from(value)?)
    }
}

/// Settings of a run, as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunParams {
    /// Configured speed.
    pub speed: f64,
    /// Loop length, `0` when not looping.
    pub loop_time_millis: u64,
    /// Clock tick period.
    pub tick_interval_millis: u64,
    /// Resolved start, once started.
    pub start_time: Option<Timestamp>,
    /// How the start was resolved.
    pub start_source: Option<StartTimeSource>,
    /// Configured relative start.
    pub start_before_millis: Option<u64>,
    /// Whether the checkpoint is consulted on start.
    pub use_checkpoint: bool,
    /// Suspended with [`Coordinator::suspend`].
    pub is_suspended: bool,
    /// Destroyed.
    pub is_stopped: bool,
}

/// Rectifier part of [`TimeStat`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RectifierStat {
    /// Configured accumulation window.
    pub accumulation_time_millis: u64,
    /// Records held.
    pub len: usize,
    /// Smallest and largest held key.
    pub range: Option<TimeRange>,
    /// Cutoff of the most recent flush.
    pub last_cutoff: Option<Timestamp>,
    /// Held records per stream.
    pub streams: BTreeMap<String, StreamStats>,
}

/// Snapshot of a running replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeStat {
    /// Current time front.
    pub virtual_ts: Timestamp,
    /// Whether the front rides the wall clock.
    pub is_current_time: bool,
    /// Average achieved speed.
    pub actual_speed: f64,
    /// Completed loops.
    pub loop_number: u64,
    /// Registered streams.
    pub stream_count: usize,
    /// Buffer state.
    pub rectifier: RectifierStat,
}

/// Sink wrapper that saves the key of the last consumed record.
struct CheckpointingSink {
    inner: Arc<dyn RecordSink>,
    store: Arc<dyn CheckpointStore>,
    sort_field: String,
}

impl RecordSink for CheckpointingSink {
    fn deliver<'a>(&'a self, batch: &'a [EventRecord]) -> BoxFuture<'a, usize> {
        async move {
            let consumed = self.inner.deliver(batch).await.min(batch.len());
            let last = consumed
                .checked_sub(1)
                .and_then(|i| batch[i].sort_key(&self.sort_field));
            if let Some(ts) = last {
                if let Err(e) = self.store.save(ts).await {
                    tracing::warn!(error = %e, ts = %ts, "failed to save checkpoint");
                }
            }
            consumed
        }
        .boxed()
    }
}

/// Owns one replay run.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use timefront::prelude::*;
///
/// # async fn run() -> timefront::Result<()> {
/// let sink = Arc::new(MemorySink::new());
/// let coordinator = Coordinator::new(
///     TimefrontConfig::from_env()?,
///     sink,
///     Arc::new(SystemClock::new()),
///     Arc::new(MemoryCheckpoint::new()),
/// )?;
///
/// let front = SharedFront::new("trades", Timestamp::ZERO);
/// let trades = coordinator.register_stream("trades", Arc::new(front.clone()));
///
/// let start = coordinator.start().await?;
/// front.set(start.ts);
/// trades.submit_json(serde_json::json!({"ts": start.ts.as_millis(), "price": 1.5}))?;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    config: TimefrontConfig,
    clock: VirtualClock,
    rectifier: Rectifier,
    wall: Arc<dyn Clock>,
    checkpoint: Arc<dyn CheckpointStore>,
    streams: Mutex<BTreeMap<String, StreamSubmitter>>,
    resolved_start: Mutex<Option<ResolvedStart>>,
    suspended: AtomicBool,
}

impl Coordinator {
    /// Build the clock and rectifier for `config`.
    pub fn new(
        config: TimefrontConfig,
        sink: Arc<dyn RecordSink>,
        wall: Arc<dyn Clock>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        Self::named("default", config, sink, wall, checkpoint)
    }

    /// Like [`new`](Self::new), naming the run in logs and metric labels.
    pub fn named(
        name: &str,
        config: TimefrontConfig,
        sink: Arc<dyn RecordSink>,
        wall: Arc<dyn Clock>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        config.validate()?;
        let clock = VirtualClock::named(name, wall.now(), &config.clock, wall.clone())?;
        let sink = Arc::new(CheckpointingSink {
            inner: sink,
            store: checkpoint.clone(),
            sort_field: config.rectifier.sort_field.clone(),
        });
        let rectifier = Rectifier::named(
            name,
            config.rectifier.clone(),
            Arc::new(clock.clone()),
            sink,
        )?;
        Ok(Self {
            config,
            clock,
            rectifier,
            wall,
            checkpoint,
            streams: Mutex::new(BTreeMap::new()),
            resolved_start: Mutex::new(None),
            suspended: AtomicBool::new(false),
        })
    }

    /// The virtual clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// The rectifier.
    pub fn rectifier(&self) -> &Rectifier {
        &self.rectifier
    }

    /// Subscribe to clock notifications.
    pub fn subscribe(&self) -> EventReceiver {
        self.clock.subscribe()
    }

    /// Register a stream.
    ///
    /// Registering an id twice returns the existing submitter and leaves the
    /// second front unregistered.
    pub fn register_stream(&self, id: &str, front: Arc<dyn StreamFront>) -> StreamSubmitter {
        let mut streams = self.streams.lock();
        if let Some(existing) = streams.get(id) {
            tracing::warn!(stream = %id, "stream already registered");
            return existing.clone();
        }
        self.clock.register(front);
        let submitter = StreamSubmitter {
            id: Arc::from(id),
            rectifier: self.rectifier.clone(),
        };
        streams.insert(id.to_string(), submitter.clone());
        tracing::info!(stream = %id, "stream registered");
        submitter
    }

    /// Submitter of a registered stream.
    pub fn stream(&self, id: &str) -> Option<StreamSubmitter> {
        self.streams.lock().get(id).cloned()
    }

    /// Ids of registered streams.
    pub fn stream_ids(&self) -> Vec<String> {
        self.streams.lock().keys().cloned().collect()
    }

    /// Resolve the start time, position the clock there and start ticking
    /// and flushing.
    ///
    /// Fails without touching the clock when either component is already
    /// running or stopped.
    pub async fn start(&self) -> Result<ResolvedStart> {
        if self.clock.is_stopped() || self.rectifier.is_stopped() {
            return Err(Error::Stopped("coordinator"));
        }
        if self.clock.is_running() {
            return Err(Error::AlreadyRunning("virtual clock"));
        }
        if self.rectifier.is_running() {
            return Err(Error::AlreadyRunning("rectifier"));
        }
        let resolved =
            resolve_start_time(&self.config.start, self.wall.now(), &*self.checkpoint).await;

        self.clock.start()?;
        self.clock.reset(resolved.ts);
        if let Err(e) = self.rectifier.start() {
            self.clock.stop();
            return Err(e);
        }
        self.clock.unlock();
        self.suspended.store(false, Ordering::Release);
        *self.resolved_start.lock() = Some(resolved);

        tracing::info!(
            start = %resolved.ts,
            streams = self.streams.lock().len(),
            speed = self.config.clock.speed,
            "replay started"
        );
        Ok(resolved)
    }

    /// Pause virtual time, and with it rectification.
    pub fn suspend(&self) {
        self.clock.lock();
        self.suspended.store(true, Ordering::Release);
    }

    /// Resume after [`suspend`](Self::suspend).
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
        self.clock.unlock();
    }

    /// Whether the run is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Apply runtime parameters.
    ///
    /// Every key is checked before any value is applied, so an unknown key
    /// changes nothing. Values are applied in key order and the first
    /// invalid one stops the update.
    pub fn apply_params(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<ClockParam>> {
        for key in params.keys() {
            key.parse::<ClockParam>()?;
        }
        params
            .iter()
            .map(|(key, value)| self.clock.apply_param(key, value))
            .collect()
    }

    /// Current run settings.
    pub fn params(&self) -> RunParams {
        let state = self.clock.state();
        let resolved = *self.resolved_start.lock();
        RunParams {
            speed: state.speed,
            loop_time_millis: state.loop_time_millis,
            tick_interval_millis: state.tick_interval_millis,
            start_time: resolved.map(|r| r.ts),
            start_source: resolved.map(|r| r.source),
            start_before_millis: self.config.start.start_before_millis,
            use_checkpoint: self.config.start.use_checkpoint,
            is_suspended: self.is_suspended(),
            is_stopped: self.clock.is_stopped(),
        }
    }

    /// Snapshot of clock and buffer state.
    pub fn stats(&self) -> TimeStat {
        let state = self.clock.state();
        TimeStat {
            virtual_ts: state.time_front,
            is_current_time: state.is_current_time,
            actual_speed: self.clock.actual_speed(),
            loop_number: state.loop_number,
            stream_count: self.streams.lock().len(),
            rectifier: RectifierStat {
                accumulation_time_millis: self.config.rectifier.accumulation_time_millis,
                len: self.rectifier.len(),
                range: self.rectifier.range(),
                last_cutoff: self.rectifier.last_cutoff(),
                streams: self.rectifier.stream_stats(),
            },
        }
    }

    /// Stop the clock and the rectifier. Neither can be restarted.
    pub async fn destroy(&self) {
        self.clock.stop();
        self.rectifier.destroy().await;
        tracing::info!(clock = %self.clock.name(), "replay destroyed");
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("clock", &self.clock)
            .field("rectifier", &self.rectifier)
            .field("streams", &self.stream_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rectifier::MemorySink;
    use crate::start_time::MemoryCheckpoint;
    use crate::virtual_time::SharedFront;
    use serde_json::json;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    struct Fixture {
        coordinator: Coordinator,
        sink: Arc<MemorySink>,
        checkpoint: Arc<MemoryCheckpoint>,
    }

    fn fixture(config: TimefrontConfig) -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let checkpoint = Arc::new(MemoryCheckpoint::new());
        let coordinator = Coordinator::new(
            config,
            sink.clone(),
            Arc::new(ManualClock::new(ts(NOW))),
            checkpoint.clone(),
        )
        .unwrap();
        Fixture {
            coordinator,
            sink,
            checkpoint,
        }
    }

    #[test]
    fn test_duplicate_stream_returns_existing() {
        let f = fixture(TimefrontConfig::default());
        let a = f
            .coordinator
            .register_stream("a", Arc::new(SharedFront::new("a", ts(0))));
        let again = f
            .coordinator
            .register_stream("a", Arc::new(SharedFront::new("a2", ts(0))));
        assert_eq!(a.id(), again.id());
        assert_eq!(f.coordinator.clock().stream_count(), 1);
        assert_eq!(f.coordinator.stream_ids(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_leaves_run_untouched() {
        let mut config = TimefrontConfig::default();
        config.start.start_before_millis = Some(60_000);
        let f = fixture(config);
        f.coordinator.start().await.unwrap();
        f.coordinator.clock().set_virtual_ts(ts(NOW - 1_000));

        let second = f.coordinator.start().await;
        assert!(matches!(second, Err(Error::AlreadyRunning(_))));
        assert!(f.coordinator.clock().virtual_ts() >= ts(NOW - 1_000));
        assert!(!f.coordinator.clock().is_locked());
        assert!(f.coordinator.clock().is_running());

        f.coordinator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_refused_while_rectifier_runs() {
        let f = fixture(TimefrontConfig::default());
        f.coordinator.rectifier().start().unwrap();

        let result = f.coordinator.start().await;
        assert!(matches!(result, Err(Error::AlreadyRunning("rectifier"))));
        assert!(!f.coordinator.clock().is_running());
        assert!(!f.coordinator.clock().is_stopped());
        assert!(f.coordinator.clock().is_locked());

        f.coordinator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submitted_records_are_tagged_and_checkpointed() {
        let mut config = TimefrontConfig::default();
        config.rectifier.accumulation_time_millis = 10;
        config.start.start_before_millis = Some(60_000);
        let f = fixture(config);
        let submitter = f
            .coordinator
            .register_stream("trades", Arc::new(|| Timestamp::MAX));

        let start = f.coordinator.start().await.unwrap();
        assert_eq!(start.ts, ts(NOW - 60_000));
        assert_eq!(start.source, StartTimeSource::Relative);
        f.coordinator.suspend();

        f.coordinator.clock().set_virtual_ts(ts(NOW - 50_000));
        submitter
            .submit_json(json!({"ts": NOW - 59_000, "v": 1}))
            .unwrap();
        submitter
            .submit_json(json!({"ts": NOW - 59_500, "v": 2}))
            .unwrap();

        let report = f.coordinator.rectifier().flush().await.unwrap();
        assert_eq!(report.consumed, 2);
        let records = f.sink.records();
        assert_eq!(records[0].get("v"), Some(&json!(2)));
        assert_eq!(records[1].stream_id(), Some("trades"));
        assert_eq!(f.checkpoint.get(), Some(ts(NOW - 59_000)));

        f.coordinator.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_and_resume() {
        let f = fixture(TimefrontConfig::default());
        f.coordinator.start().await.unwrap();
        assert!(!f.coordinator.clock().is_locked());

        f.coordinator.suspend();
        assert!(f.coordinator.is_suspended());
        assert!(f.coordinator.clock().is_locked());
        assert!(f.coordinator.params().is_suspended);

        f.coordinator.resume();
        assert!(!f.coordinator.clock().is_locked());
        f.coordinator.destroy().await;
        assert!(f.coordinator.params().is_stopped);
        assert!(matches!(f.coordinator.start().await, Err(Error::Stopped(_))));
    }

    #[test]
    fn test_apply_params_rejects_unknown_keys_first() {
        let f = fixture(TimefrontConfig::default());
        let params = json!({"speed": 4, "volume": 11});
        let err = f
            .coordinator
            .apply_params(params.as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownParam(key) if key == "volume"));
        assert_eq!(f.coordinator.params().speed, 1.0);

        let params = json!({"speed": 4, "STREAM_LOOP_TIME_MILLIS": 3_600_000});
        let applied = f
            .coordinator
            .apply_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(f.coordinator.params().speed, 4.0);
        assert_eq!(f.coordinator.params().loop_time_millis, 3_600_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_snapshot() {
        let f = fixture(TimefrontConfig::default());
        let front = SharedFront::new("a", ts(0));
        let a = f.coordinator.register_stream("a", Arc::new(front.clone()));
        let start = f.coordinator.start().await.unwrap();
        assert_eq!(start.source, StartTimeSource::Now);
        front.set(start.ts);

        a.submit(EventRecord::at("ts", ts(NOW + 5))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = f.coordinator.stats();
        assert_eq!(stats.stream_count, 1);
        assert_eq!(stats.rectifier.len, 1);
        assert_eq!(stats.rectifier.streams["a"].count, 1);
        assert_eq!(stats.rectifier.accumulation_time_millis, 300_000);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["rectifier"]["len"], json!(1));
        f.coordinator.destroy().await;
    }
}
