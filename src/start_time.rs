//! Where a replay run starts.
//!
//! The start is resolved from [`StartTimeConfig`] in this order:
//!
//! 1. `start_before_millis`: that far before now
//! 2. `start_time`: an absolute timestamp
//! 3. the last timestamp saved in a [`CheckpointStore`], when enabled
//! 4. now
//!
//! A failing checkpoint store is logged and skipped.

use crate::config::StartTimeConfig;
use crate::error::{Error, Result};
use crate::temporal::Timestamp;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

/// Parse a relative time such as `30m`, `2h`, `1d`, `45s` or `500ms`.
///
/// Units: `ms`, `s`/`sec`, `m`/`min`, `h`/`hour`, `d`/`day`, `w`/`week`
/// (plurals accepted). A bare number is read as milliseconds.
pub fn parse_time_param(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    let unit_millis: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "millis" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        "w" | "week" | "weeks" => 604_800_000.0,
        _ => return None,
    };
    let millis = (number * unit_millis).ceil();
    (millis <= u64::MAX as f64).then(|| Duration::from_millis(millis as u64))
}

// ============================================================================
// Checkpoint store
// ============================================================================

/// Persists the last delivered timestamp so a later run can resume from it.
pub trait CheckpointStore: Send + Sync {
    /// Read the saved timestamp, if any.
    fn load(&self) -> BoxFuture<'_, Result<Option<Timestamp>>>;

    /// Save a timestamp.
    fn save(&self, ts: Timestamp) -> BoxFuture<'_, Result<()>>;
}

/// A store that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

impl CheckpointStore for NoCheckpoint {
    fn load(&self) -> BoxFuture<'_, Result<Option<Timestamp>>> {
        futures::future::ready(Ok(None)).boxed()
    }

    fn save(&self, _ts: Timestamp) -> BoxFuture<'_, Result<()>> {
        futures::future::ready(Ok(())).boxed()
    }
}

/// In-process checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    last: Mutex<Option<Timestamp>>,
    unavailable: Mutex<bool>,
}

impl MemoryCheckpoint {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `ts`.
    pub fn with(ts: Timestamp) -> Self {
        let store = Self::default();
        *store.last.lock() = Some(ts);
        store
    }

    /// Currently saved timestamp.
    pub fn get(&self) -> Option<Timestamp> {
        *self.last.lock()
    }

    /// Make every operation fail, as a disconnected backend would.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(Error::Checkpoint("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> BoxFuture<'_, Result<Option<Timestamp>>> {
        let result = self.check().map(|()| self.get());
        futures::future::ready(result).boxed()
    }

    fn save(&self, ts: Timestamp) -> BoxFuture<'_, Result<()>> {
        let result = self.check().map(|()| {
            *self.last.lock() = Some(ts);
        });
        futures::future::ready(result).boxed()
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Which rule produced the start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTimeSource {
    /// Relative to now.
    Relative,
    /// Configured absolute time.
    Explicit,
    /// Last checkpointed timestamp.
    Checkpoint,
    /// No rule applied.
    Now,
}

/// A resolved start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedStart {
    /// Start of replay.
    pub ts: Timestamp,
    /// Rule that produced it.
    pub source: StartTimeSource,
}

/// Resolve the start of a run.
pub async fn resolve_start_time(
    config: &StartTimeConfig,
    now: Timestamp,
    store: &dyn CheckpointStore,
) -> ResolvedStart {
    let resolved = if let Some(before) = config.start_before_millis {
        let before = i64::try_from(before).unwrap_or(i64::MAX);
        ResolvedStart {
            ts: now.saturating_sub_millis(before),
            source: StartTimeSource::Relative,
        }
    } else if let Some(ts) = config.start_time {
        ResolvedStart {
            ts,
            source: StartTimeSource::Explicit,
        }
    } else {
        match load_checkpoint(config, store).await {
            Some(ts) => ResolvedStart {
                ts,
                source: StartTimeSource::Checkpoint,
            },
            None => ResolvedStart {
                ts: now,
                source: StartTimeSource::Now,
            },
        }
    };

    tracing::info!(start = %resolved.ts, source = ?resolved.source, "start time resolved");
    resolved
}

async fn load_checkpoint(config: &StartTimeConfig, store: &dyn CheckpointStore) -> Option<Timestamp> {
    if !config.use_checkpoint {
        return None;
    }
    match store.load().await {
        Ok(ts) => ts,
        Err(e) => {
            tracing::error!(error = %e, "failed to read start time from checkpoint store");
            None
        }
    }
}
