//! Virtual clock state machine.
//!
//! [`ClockCore`] holds the time front and everything needed to advance it.
//! It is pure: the caller supplies the wall-clock reading and the consensus
//! front of the registered producers, and receives a [`TickReport`] listing
//! the notifications the tick produced. Scheduling and publishing live in
//! [`VirtualClock`](super::VirtualClock).

use super::events::{ClockEvent, DateChange, HourChange};
use crate::config::{ClockConfig, effective_speed};
use crate::temporal::{MILLIS_IN_DAY, MILLIS_IN_HOUR, Timestamp, duration_millis};
use serde::Serialize;
use std::time::Duration;

/// Snapshot of the clock state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockState {
    /// Virtual time replay started from.
    pub virtual_start_ts: Timestamp,
    /// Wall time the run started at.
    pub real_start_ts: Timestamp,
    /// Current time front.
    pub time_front: Timestamp,
    /// Configured speed (before the "0 means 1" rule).
    pub speed: f64,
    /// Loop length, `0` when not looping.
    pub loop_time_millis: u64,
    /// Tick period.
    pub tick_interval_millis: u64,
    /// The time front is riding the wall clock.
    pub is_current_time: bool,
    /// Completed loops.
    pub loop_number: u64,
    /// Advancement is paused.
    pub locked: bool,
}

/// Notifications produced by one tick, in emission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick ran (the clock was not locked).
    pub advanced: bool,
    /// Time front after the tick.
    pub time_front: Timestamp,
    /// Caught up with the wall clock during this tick.
    pub synchronized: bool,
    /// Loop counter after a loop-back during this tick.
    pub loop_back: Option<u64>,
    /// Day boundary crossed.
    pub date_changed: Option<DateChange>,
    /// Hour boundary crossed.
    pub hour_changed: Option<HourChange>,
}

impl TickReport {
    /// Iterate over the events of this tick.
    pub fn events(&self) -> impl Iterator<Item = ClockEvent> {
        self.synchronized
            .then_some(ClockEvent::Synchronized)
            .into_iter()
            .chain(self.loop_back.map(|loop_number| ClockEvent::LoopBack { loop_number }))
            .chain(self.date_changed.map(ClockEvent::DateChanged))
            .chain(self.hour_changed.map(ClockEvent::HourChanged))
    }
}

/// Time front and the rules that move it.
#[derive(Debug, Clone)]
pub struct ClockCore {
    virtual_start: Timestamp,
    real_start: Timestamp,
    time_front: Timestamp,
    speed: f64,
    loop_time_millis: u64,
    tick_interval: Duration,
    /// Sub-millisecond part of the speed-scaled shift not yet applied.
    carry: f64,
    is_current_time: bool,
    loop_number: u64,
    locked: bool,
    prev_day: Option<i64>,
    prev_hour: Option<i64>,
}

impl ClockCore {
    /// Create a locked clock positioned at `virtual_start`.
    pub fn new(virtual_start: Timestamp, real_start: Timestamp, config: &ClockConfig) -> Self {
        Self {
            virtual_start,
            real_start,
            time_front: virtual_start,
            speed: config.speed,
            loop_time_millis: config.loop_time_millis,
            tick_interval: config.tick_interval(),
            carry: 0.0,
            is_current_time: false,
            loop_number: 0,
            locked: true,
            prev_day: None,
            prev_hour: None,
        }
    }

    /// Advance the time front by one tick.
    ///
    /// `consensus` is the smallest desired front of the registered producers,
    /// or `None` when no producer is registered.
    pub fn tick(&mut self, now: Timestamp, consensus: Option<Timestamp>) -> TickReport {
        if self.locked {
            return TickReport {
                time_front: self.time_front,
                ..TickReport::default()
            };
        }

        let mut report = TickReport {
            advanced: true,
            ..TickReport::default()
        };
        report.synchronized = self.advance(now, consensus);
        report.loop_back = self.loop_if_needed();
        report.date_changed = self.detect_day_change();
        report.hour_changed = self.detect_hour_change();
        report.time_front = self.time_front;
        report
    }

    /// Returns true when this call caught up with `now`.
    fn advance(&mut self, now: Timestamp, consensus: Option<Timestamp>) -> bool {
        if self.is_current_time {
            self.time_front = now;
            return false;
        }

        let exact = duration_millis(self.tick_interval) as f64 * effective_speed(self.speed)
            + self.carry;
        let whole = exact.floor();
        self.carry = exact - whole;
        let shifted = self.time_front.saturating_add_millis(whole as i64);

        self.time_front = match consensus {
            Some(front) => {
                if front < shifted {
                    self.carry = 0.0;
                }
                front.min(shifted).max(self.time_front)
            }
            None => shifted,
        };

        if self.time_front >= now {
            self.time_front = now;
            self.is_current_time = true;
            return true;
        }
        false
    }

    fn loop_end(&self) -> Option<Timestamp> {
        (self.loop_time_millis > 0).then(|| {
            self.virtual_start
                .saturating_add_millis(i64::try_from(self.loop_time_millis).unwrap_or(i64::MAX))
        })
    }

    fn loop_if_needed(&mut self) -> Option<u64> {
        let end = self.loop_end()?;
        if self.time_front < end {
            return None;
        }
        self.time_front = self.virtual_start;
        self.carry = 0.0;
        self.loop_number += 1;
        Some(self.loop_number)
    }

    fn detect_day_change(&mut self) -> Option<DateChange> {
        let curr = self.time_front.day_number();
        let prev = self.prev_day.replace(curr)?;
        (prev < curr).then(|| DateChange {
            prev_day: prev,
            curr_day: curr,
            prev_ts: Timestamp::from_millis(prev.saturating_mul(MILLIS_IN_DAY)),
            curr_ts: Timestamp::from_millis(curr.saturating_mul(MILLIS_IN_DAY)),
        })
    }

    /// Any change counts, including a backward jump caused by loop-back.
    fn detect_hour_change(&mut self) -> Option<HourChange> {
        let curr = self.time_front.hour_number();
        let prev = self.prev_hour.replace(curr)?;
        (prev != curr).then(|| HourChange {
            prev_hour: prev,
            curr_hour: curr,
            prev_hour_of_day: prev.rem_euclid(24),
            curr_hour_of_day: curr.rem_euclid(24),
            prev_ts: Timestamp::from_millis(prev.saturating_mul(MILLIS_IN_HOUR)),
            curr_ts: Timestamp::from_millis(curr.saturating_mul(MILLIS_IN_HOUR)),
        })
    }

    /// Pause advancement. Leaves real-time mode.
    pub fn lock(&mut self) {
        if !self.locked {
            self.is_current_time = false;
            self.locked = true;
        }
    }

    /// Resume advancement.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Restart from a new virtual start. The clock is left locked.
    pub fn reset(&mut self, virtual_start: Timestamp, real_start: Timestamp) {
        self.locked = true;
        self.virtual_start = virtual_start;
        self.real_start = real_start;
        self.time_front = virtual_start;
        self.carry = 0.0;
        self.is_current_time = false;
        self.loop_number = 0;
        self.prev_day = None;
        self.prev_hour = None;
    }

    /// Force the time front.
    pub fn set_time_front(&mut self, ts: Timestamp) {
        self.time_front = ts;
        self.carry = 0.0;
    }

    /// Set the speed used by the next tick.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    /// Set the loop length used by the next tick.
    pub fn set_loop_time_millis(&mut self, millis: u64) {
        self.loop_time_millis = millis;
    }

    /// Set the tick period.
    pub fn set_tick_interval(&mut self, interval: Duration) {
        self.tick_interval = interval;
    }

    /// Current time front.
    #[inline]
    pub fn time_front(&self) -> Timestamp {
        self.time_front
    }

    /// Tick period.
    #[inline]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Whether the front rides the wall clock.
    #[inline]
    pub fn is_current_time(&self) -> bool {
        self.is_current_time
    }

    /// Whether advancement is paused.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Completed loops.
    #[inline]
    pub fn loop_number(&self) -> u64 {
        self.loop_number
    }

    /// Average achieved speed since the run started.
    pub fn actual_speed(&self, now: Timestamp) -> f64 {
        let real = now.millis_since(self.real_start);
        if real <= 0 {
            return 0.0;
        }
        self.time_front.millis_since(self.virtual_start) as f64 / real as f64
    }

    /// Snapshot of the state.
    pub fn state(&self) -> ClockState {
        ClockState {
            virtual_start_ts: self.virtual_start,
            real_start_ts: self.real_start,
            time_front: self.time_front,
            speed: self.speed,
            loop_time_millis: self.loop_time_millis,
            tick_interval_millis: self.tick_interval.as_millis() as u64,
            is_current_time: self.is_current_time,
            loop_number: self.loop_number,
            locked: self.locked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = MILLIS_IN_HOUR;
    const DAY: i64 = MILLIS_IN_DAY;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn core(start: i64, config: ClockConfig) -> ClockCore {
        let mut core = ClockCore::new(ts(start), ts(start), &config);
        core.unlock();
        core
    }

    #[test]
    fn test_locked_clock_does_not_move() {
        let mut core = ClockCore::new(ts(1_000), ts(1_000), &ClockConfig::default());
        let report = core.tick(ts(10_000_000), None);
        assert!(!report.advanced);
        assert_eq!(core.time_front(), ts(1_000));
    }

    #[test]
    fn test_shift_without_streams() {
        let mut core = core(1_000, ClockConfig::default().with_speed(2.0));
        for _ in 0..10 {
            core.tick(ts(1_000_000_000), None);
        }
        assert_eq!(core.time_front(), ts(1_060));
    }

    #[test]
    fn test_fractional_speed_carries_remainder() {
        let mut core = core(0, ClockConfig::default().with_speed(0.5));
        for _ in 0..4 {
            core.tick(ts(1_000_000), None);
        }
        // 4 ticks * 3ms * 0.5
        assert_eq!(core.time_front(), ts(6));
    }

    #[test]
    fn test_consensus_bounds_advance() {
        let mut core = core(1_000, ClockConfig::default().with_speed(100.0));
        core.tick(ts(1_000_000), Some(ts(1_010)));
        assert_eq!(core.time_front(), ts(1_010));

        // A front behind the time front never moves it back.
        core.tick(ts(1_000_000), Some(ts(900)));
        assert_eq!(core.time_front(), ts(1_010));

        core.tick(ts(1_000_000), Some(ts(5_000)));
        assert_eq!(core.time_front(), ts(1_310));
    }

    #[test]
    fn test_time_front_never_exceeds_consensus_or_now() {
        let mut core = core(0, ClockConfig::default().with_speed(1_000.0));
        let mut front = 0;
        let mut now = 50_000;
        let mut prev = core.time_front();
        for i in 0..500 {
            front += (i * 7) % 13;
            now += 3;
            let report = core.tick(ts(now), Some(ts(front)));
            assert!(report.time_front <= ts(front).min(ts(now)));
            assert!(report.time_front >= prev);
            prev = report.time_front;
        }
    }

    #[test]
    fn test_synchronized_fires_once_per_lock_cycle() {
        let mut core = core(0, ClockConfig::default().with_speed(10.0));
        let mut fired = 0;
        for now in (0..100).map(|i| 20 + i * 3) {
            if core.tick(ts(now), None).synchronized {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert!(core.is_current_time());

        // Once caught up the front rides the wall clock.
        core.tick(ts(5_000), None);
        assert_eq!(core.time_front(), ts(5_000));

        core.lock();
        assert!(!core.is_current_time());
        core.unlock();
        let mut fired = 0;
        for now in (0..100).map(|i| 5_010 + i * 3) {
            if core.tick(ts(now), None).synchronized {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_loop_back_resets_to_start() {
        let mut core = core(
            1_000,
            ClockConfig::default()
                .with_speed(1.0)
                .with_loop_time_millis(9),
        );
        let now = ts(1_000_000);
        core.tick(now, None);
        core.tick(now, None);
        assert_eq!(core.time_front(), ts(1_006));
        let report = core.tick(now, None);
        assert_eq!(report.loop_back, Some(1));
        assert_eq!(core.time_front(), ts(1_000));
        assert_eq!(core.loop_number(), 1);
        assert_eq!(report.events().collect::<Vec<_>>(), vec![ClockEvent::LoopBack { loop_number: 1 }]);
    }

    #[test]
    fn test_date_change_fires_once_on_crossing() {
        let mut core = core(DAY - 3, ClockConfig::default());
        let now = ts(10 * DAY);

        // First tick only records the day.
        core.set_time_front(ts(DAY - 4));
        let report = core.tick(now, Some(ts(DAY - 1)));
        assert_eq!(report.time_front, ts(DAY - 1));
        assert!(report.date_changed.is_none());

        let report = core.tick(now, Some(ts(DAY + 1)));
        assert_eq!(report.time_front, ts(DAY + 1));
        assert_eq!(
            report.date_changed,
            Some(DateChange {
                prev_day: 0,
                curr_day: 1,
                prev_ts: ts(0),
                curr_ts: ts(DAY),
            })
        );

        let report = core.tick(now, Some(ts(DAY + 2)));
        assert!(report.date_changed.is_none());
    }

    #[test]
    fn test_hour_change_fires_on_backward_jump() {
        let start = 5 * HOUR - 6;
        let mut core = core(start, ClockConfig::default().with_loop_time_millis(9));
        let now = ts(10 * DAY);

        assert!(core.tick(now, None).hour_changed.is_none());
        let report = core.tick(now, None);
        assert_eq!(report.time_front, ts(5 * HOUR));
        let change = report.hour_changed.unwrap();
        assert_eq!((change.prev_hour, change.curr_hour), (4, 5));
        assert_eq!((change.prev_hour_of_day, change.curr_hour_of_day), (4, 5));

        // Next tick reaches the loop end and jumps back into hour 4.
        let report = core.tick(now, None);
        assert_eq!(report.loop_back, Some(1));
        let change = report.hour_changed.unwrap();
        assert_eq!((change.prev_hour, change.curr_hour), (5, 4));
        assert!(report.date_changed.is_none());
    }

    #[test]
    fn test_reset_clears_progress() {
        let mut core = core(0, ClockConfig::default().with_loop_time_millis(3));
        core.tick(ts(1_000), None);
        assert_eq!(core.loop_number(), 1);

        core.reset(ts(500), ts(2_000));
        assert!(core.is_locked());
        assert_eq!(core.time_front(), ts(500));
        assert_eq!(core.loop_number(), 0);
        assert_eq!(core.state().real_start_ts, ts(2_000));
    }

    #[test]
    fn test_actual_speed() {
        let mut core = ClockCore::new(ts(0), ts(10_000), &ClockConfig::default());
        core.set_time_front(ts(600));
        assert_eq!(core.actual_speed(ts(10_300)), 2.0);
        assert_eq!(core.actual_speed(ts(10_000)), 0.0);
    }
}
