//! Time sources.
//!
//! This module provides:
//! - [`Clock`]: Trait for time sources
//! - [`SystemClock`]: Wall clock (UTC, milliseconds)
//! - [`ManualClock`]: Settable clock for deterministic tests
//! - [`TokioClock`]: Wall clock driven by the Tokio time driver
//!
//! The virtual clock consumes a `Clock` as its notion of "now", and the
//! rectifier consumes the virtual clock through the same trait.

use crate::temporal::{Timestamp, duration_millis};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

// ============================================================================
// Clock Trait
// ============================================================================

/// A clock that provides the current time.
///
/// Implementations used as a wall clock should be monotonic in practice;
/// the virtual clock never moves its time front past `now()`.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> Timestamp;

    /// Get a human-readable name for the clock.
    fn name(&self) -> &str {
        "unknown"
    }
}

// ============================================================================
// SystemClock
// ============================================================================

/// System wall clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn name(&self) -> &str {
        "system"
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// A clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use timefront::clock::{Clock, ManualClock};
/// use timefront::temporal::Timestamp;
/// use std::time::Duration;
///
/// let clock = ManualClock::new(Timestamp::from_millis(1_000));
/// clock.advance(Duration::from_millis(5));
/// assert_eq!(clock.now(), Timestamp::from_millis(1_005));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    /// Set the current time.
    pub fn set(&self, ts: Timestamp) {
        self.millis.store(ts.as_millis(), Ordering::Release);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(duration_millis(by), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::Acquire))
    }

    fn name(&self) -> &str {
        "manual"
    }
}

// ============================================================================
// TokioClock
// ============================================================================

/// Wall clock anchored at a base timestamp and advanced by Tokio's clock.
///
/// Under `tokio::time::pause()` this clock only moves when the runtime
/// auto-advances or `tokio::time::advance` is called, which makes timer
/// driven tests deterministic.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: Timestamp,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor the clock at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Timestamp::now())
    }

    /// Anchor the clock at an explicit timestamp.
    pub fn starting_at(base: Timestamp) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        self.base + self.origin.elapsed()
    }

    fn name(&self) -> &str {
        "tokio"
    }
}
