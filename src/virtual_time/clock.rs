//! The running virtual clock.

use super::engine::{ClockCore, ClockState, TickReport};
use super::events::{EventReceiver, EventSender};
use super::front::{StreamFront, consensus_front};
use crate::clock::Clock;
use crate::config::{ClockConfig, ClockParam, param_number};
use crate::error::{Error, Result};
use crate::observability::{ClockMetrics, span_clock, trace_clock_event, trace_state_change};
use crate::temporal::Timestamp;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// Shared, tickable virtual time.
///
/// A `VirtualClock` is a cheap handle; clones drive and observe the same
/// clock. It is created locked at its virtual start and does not move until
/// [`unlock`](Self::unlock) is called and it is ticked, either manually with
/// [`tick`](Self::tick) or by the task spawned from [`start`](Self::start).
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use timefront::clock::ManualClock;
/// use timefront::config::ClockConfig;
/// use timefront::temporal::Timestamp;
/// use timefront::virtual_time::VirtualClock;
///
/// let wall = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
/// let clock = VirtualClock::new(
///     Timestamp::from_millis(0),
///     &ClockConfig::default().with_speed(10.0),
///     wall,
/// )
/// .unwrap();
///
/// clock.unlock();
/// clock.tick();
/// assert_eq!(clock.virtual_ts(), Timestamp::from_millis(30));
/// ```
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    core: Mutex<ClockCore>,
    streams: RwLock<Vec<Arc<dyn StreamFront>>>,
    wall: Arc<dyn Clock>,
    events: EventSender,
    metrics: ClockMetrics,
    stopped: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualClock {
    /// Create a locked clock positioned at `start`.
    pub fn new(start: Timestamp, config: &ClockConfig, wall: Arc<dyn Clock>) -> Result<Self> {
        Self::named("default", start, config, wall)
    }

    /// Create a locked clock with a name used in logs and metric labels.
    pub fn named(
        name: &str,
        start: Timestamp,
        config: &ClockConfig,
        wall: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let core = ClockCore::new(start, wall.now(), config);
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                core: Mutex::new(core),
                streams: RwLock::new(Vec::new()),
                wall,
                events: EventSender::default(),
                metrics: ClockMetrics::new(name),
                stopped: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        })
    }

    /// Clock name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // ========================================================================
    // Producers
    // ========================================================================

    /// Add a producer to the consensus set.
    pub fn register(&self, front: Arc<dyn StreamFront>) {
        tracing::debug!(clock = %self.inner.name, stream = %front.name(), "stream registered");
        self.inner.streams.write().push(front);
    }

    /// Number of registered producers.
    pub fn stream_count(&self) -> usize {
        self.inner.streams.read().len()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Set the replay speed. `0` is treated as `1`.
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(Error::config("speed", format!("must be >= 0, got {}", speed)));
        }
        self.inner.core.lock().set_speed(speed);
        tracing::info!(clock = %self.inner.name, speed, "speed changed");
        Ok(())
    }

    /// Set the loop length; `0` disables looping.
    pub fn set_loop_time_millis(&self, millis: u64) -> Result<()> {
        if millis > i64::MAX as u64 {
            return Err(Error::config("loop_time_millis", "out of range"));
        }
        self.inner.core.lock().set_loop_time_millis(millis);
        tracing::info!(clock = %self.inner.name, loop_time_millis = millis, "loop time changed");
        Ok(())
    }

    /// Set the tick period. Takes effect from the next scheduled tick.
    pub fn set_tick_interval(&self, interval: Duration) -> Result<()> {
        if interval.as_millis() == 0 {
            return Err(Error::config("tick_interval_millis", "must be at least 1ms"));
        }
        self.inner.core.lock().set_tick_interval(interval);
        tracing::info!(
            clock = %self.inner.name,
            tick_interval_ms = interval.as_millis() as u64,
            "tick interval changed"
        );
        Ok(())
    }

    /// Apply a runtime parameter by key.
    ///
    /// `speed` is floored and must be at least 1. Millisecond values are
    /// rounded up.
    pub fn apply_param(&self, key: &str, value: &serde_json::Value) -> Result<ClockParam> {
        let param: ClockParam = key.parse()?;
        let number = param_number(key, value)?;
        match param {
            ClockParam::Speed => {
                let speed = number.floor();
                if !(speed >= 1.0) {
                    return Err(Error::param(key, format!("must be at least 1, got {}", number)));
                }
                self.set_speed(speed)
                    .map_err(|e| Error::param(key, e.to_string()))?;
            }
            ClockParam::LoopTimeMillis => {
                if !number.is_finite() || number < 0.0 {
                    return Err(Error::param(key, format!("must be >= 0, got {}", number)));
                }
                self.set_loop_time_millis(number.ceil() as u64)
                    .map_err(|e| Error::param(key, e.to_string()))?;
            }
            ClockParam::TickIntervalMillis => {
                let millis = number.ceil();
                if !millis.is_finite() || millis < 1.0 {
                    return Err(Error::param(key, format!("must be at least 1, got {}", number)));
                }
                self.set_tick_interval(Duration::from_millis(millis as u64))
                    .map_err(|e| Error::param(key, e.to_string()))?;
            }
        }
        Ok(param)
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Pause advancement and leave real-time mode.
    pub fn lock(&self) {
        let mut core = self.inner.core.lock();
        if !core.is_locked() {
            core.lock();
            trace_state_change("clock", &self.inner.name, "running", "locked");
        }
    }

    /// Resume advancement.
    pub fn unlock(&self) {
        let mut core = self.inner.core.lock();
        if core.is_locked() {
            core.unlock();
            trace_state_change("clock", &self.inner.name, "locked", "running");
        }
    }

    /// Force the time front.
    pub fn set_virtual_ts(&self, ts: Timestamp) {
        self.inner.core.lock().set_time_front(ts);
        tracing::debug!(clock = %self.inner.name, ts = %ts, "virtual time set");
    }

    /// Restart from `start`: relock, clear the loop counter and boundary
    /// tracking, and re-stamp the real start.
    pub fn reset(&self, start: Timestamp) {
        let now = self.inner.wall.now();
        self.inner.core.lock().reset(start, now);
        tracing::info!(clock = %self.inner.name, start = %start, "clock reset");
    }

    /// Run one tick now.
    pub fn tick(&self) -> TickReport {
        self.inner.tick()
    }

    /// Spawn the periodic tick task. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped("virtual clock"));
        }
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(Error::AlreadyRunning("virtual clock"));
        }
        let weak = Arc::downgrade(&self.inner);
        let span = span_clock(&self.inner.name);
        *task = Some(tokio::spawn(run_ticks(weak).instrument(span)));
        tracing::info!(clock = %self.inner.name, "tick task started");
        Ok(())
    }

    /// Stop ticking for good. No notification is published after this
    /// returns.
    pub fn stop(&self) {
        {
            let _core = self.inner.core.lock();
            if self.inner.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        tracing::info!(clock = %self.inner.name, "clock stopped");
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Whether the tick task is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Current time front.
    pub fn virtual_ts(&self) -> Timestamp {
        self.inner.core.lock().time_front()
    }

    /// Whether the front has caught up with the wall clock.
    pub fn is_current_time(&self) -> bool {
        self.inner.core.lock().is_current_time()
    }

    /// Whether advancement is paused.
    pub fn is_locked(&self) -> bool {
        self.inner.core.lock().is_locked()
    }

    /// Average achieved speed since the run started.
    pub fn actual_speed(&self) -> f64 {
        let now = self.inner.wall.now();
        self.inner.core.lock().actual_speed(now)
    }

    /// Snapshot of the clock state.
    pub fn state(&self) -> ClockState {
        self.inner.core.lock().state()
    }

    /// Subscribe to this clock's notifications.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn tick(&self) -> TickReport {
        // Producer fronts and the wall clock are read outside the state lock.
        let consensus = consensus_front(self.streams.read().iter());
        let now = self.wall.now();

        let mut core = self.core.lock();
        if self.stopped.load(Ordering::Acquire) {
            return TickReport {
                time_front: core.time_front(),
                ..TickReport::default()
            };
        }
        let report = core.tick(now, consensus);
        if report.advanced {
            self.metrics.record_tick(report.time_front.as_millis());
            if report.loop_back.is_some() {
                self.metrics.record_loop_back();
            }
            for event in report.events() {
                trace_clock_event(&self.name, &event);
                self.events.send(event);
            }
        }
        report
    }

    fn tick_interval(&self) -> Duration {
        self.core.lock().tick_interval()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_ticks(clock: Weak<Inner>) {
    let mut next_cycle = Instant::now();

    loop {
        let interval = {
            let Some(inner) = clock.upgrade() else {
                break;
            };
            if inner.stopped.load(Ordering::Acquire) {
                break;
            }
            inner.tick();
            inner.tick_interval()
        };

        next_cycle += interval;

        // If we've fallen behind, catch up
        let now = Instant::now();
        if next_cycle < now {
            tracing::trace!("tick loop falling behind, skipping to next cycle");
            next_cycle = now + interval;
        }

        tokio::time::sleep_until(next_cycle).await;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        self.virtual_ts()
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

impl fmt::Display for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (front, current) = {
            let core = self.inner.core.lock();
            (core.time_front(), core.is_current_time())
        };
        write!(f, "<{}{}>", front, if current { "*" } else { "" })
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("streams", &self.stream_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};
    use crate::virtual_time::{ClockEvent, SharedFront};
    use serde_json::json;

    const FAR_FUTURE: i64 = 4_000_000_000_000;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn manual_clock(start: i64, config: ClockConfig) -> (VirtualClock, Arc<ManualClock>) {
        let wall = Arc::new(ManualClock::new(ts(FAR_FUTURE)));
        let clock = VirtualClock::new(ts(start), &config, wall.clone()).unwrap();
        (clock, wall)
    }

    #[test]
    fn test_created_locked() {
        let (clock, _) = manual_clock(1_000, ClockConfig::default());
        assert!(clock.is_locked());
        assert!(!clock.tick().advanced);
        assert_eq!(clock.virtual_ts(), ts(1_000));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let wall = Arc::new(ManualClock::new(ts(0)));
        let config = ClockConfig::default().with_speed(-1.0);
        assert!(matches!(
            VirtualClock::new(ts(0), &config, wall),
            Err(Error::InvalidConfig { field: "speed", .. })
        ));
    }

    #[test]
    fn test_registered_streams_bound_the_front() {
        let (clock, _) = manual_clock(0, ClockConfig::default().with_speed(1_000.0));
        let slow = SharedFront::new("slow", ts(100));
        let fast = SharedFront::new("fast", ts(1_000_000));
        clock.register(Arc::new(slow.clone()));
        clock.register(Arc::new(fast));
        assert_eq!(clock.stream_count(), 2);

        clock.unlock();
        clock.tick();
        assert_eq!(clock.virtual_ts(), ts(100));

        slow.advance_to(ts(2_000));
        clock.tick();
        assert_eq!(clock.virtual_ts(), ts(2_000));
    }

    #[test]
    fn test_synchronized_published_once_per_unlock() {
        let wall = Arc::new(ManualClock::new(ts(10)));
        let clock = VirtualClock::new(ts(0), &ClockConfig::default().with_speed(5.0), wall.clone())
            .unwrap();
        let mut events = clock.subscribe();

        clock.unlock();
        for _ in 0..5 {
            wall.advance(Duration::from_millis(3));
            clock.tick();
        }
        assert_eq!(events.drain(), vec![ClockEvent::Synchronized]);
        assert!(clock.is_current_time());
        assert_eq!(clock.virtual_ts(), wall.now());
        assert!(clock.to_string().ends_with("*>"));

        clock.lock();
        assert!(!clock.is_current_time());
        clock.unlock();
        clock.tick();
        assert_eq!(events.drain(), vec![ClockEvent::Synchronized]);
    }

    #[test]
    fn test_apply_param() {
        let (clock, _) = manual_clock(0, ClockConfig::default());

        assert_eq!(clock.apply_param("speed", &json!(3.7)).unwrap(), ClockParam::Speed);
        assert_eq!(clock.state().speed, 3.0);

        clock
            .apply_param("STREAM_LOOP_TIME_MILLIS", &json!("60_000"))
            .unwrap();
        assert_eq!(clock.state().loop_time_millis, 60_000);

        clock
            .apply_param("STREAM_TIME_FRONT_UPDATE_INTERVAL_MILLIS", &json!(5))
            .unwrap();
        assert_eq!(clock.state().tick_interval_millis, 5);

        assert!(matches!(
            clock.apply_param("speed", &json!(0.5)),
            Err(Error::InvalidParam { .. })
        ));
        assert!(matches!(
            clock.apply_param("speed", &json!("fast")),
            Err(Error::InvalidParam { .. })
        ));
        assert!(matches!(
            clock.apply_param("colour", &json!(1)),
            Err(Error::UnknownParam(_))
        ));
        assert_eq!(clock.state().speed, 3.0);
    }

    #[test]
    fn test_stop_silences_notifications() {
        let (clock, _) = manual_clock(0, ClockConfig::default().with_loop_time_millis(3));
        let mut events = clock.subscribe();
        clock.unlock();
        clock.tick();
        assert_eq!(events.drain(), vec![ClockEvent::LoopBack { loop_number: 1 }]);

        clock.stop();
        assert!(!clock.tick().advanced);
        assert!(events.drain().is_empty());
        assert!(matches!(clock.start(), Err(Error::Stopped(_))));
    }

    #[test]
    fn test_reset_and_set_virtual_ts() {
        let (clock, _) = manual_clock(0, ClockConfig::default());
        clock.unlock();
        clock.tick();
        clock.set_virtual_ts(ts(5_000));
        assert_eq!(clock.virtual_ts(), ts(5_000));
        assert_eq!(clock.to_string(), "<1970-01-01T00:00:05.000Z>");

        clock.reset(ts(42));
        assert!(clock.is_locked());
        assert_eq!(clock.virtual_ts(), ts(42));
        assert_eq!(clock.state().loop_number, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_two_advances_twice_wall_time() {
        let wall = Arc::new(TokioClock::starting_at(ts(1_700_000_000_000)));
        let start = ts(1_600_000_000_000);
        let clock =
            VirtualClock::new(start, &ClockConfig::default().with_speed(2.0), wall).unwrap();
        clock.unlock();
        clock.start().unwrap();
        assert!(matches!(clock.start(), Err(Error::AlreadyRunning(_))));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let advanced = clock.virtual_ts().millis_since(start);
        assert!((290..=306).contains(&advanced), "advanced {advanced}ms");
        clock.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_stop() {
        let wall = Arc::new(TokioClock::starting_at(ts(FAR_FUTURE)));
        let clock = VirtualClock::new(
            ts(0),
            &ClockConfig::default().with_speed(1_000_000.0),
            wall,
        )
        .unwrap();
        let mut events = clock.subscribe();
        clock.unlock();
        clock.start().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        clock.stop();
        events.drain();
        let frozen = clock.virtual_ts();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(events.try_recv().is_none());
        assert_eq!(clock.virtual_ts(), frozen);
    }
}
