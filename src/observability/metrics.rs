//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const TICKS: &str = "timefront_ticks";
const LOOP_BACKS: &str = "timefront_loop_backs";
const VIRTUAL_TS: &str = "timefront_virtual_ts";
const RECORDS_ADDED: &str = "timefront_records_added";
const RECORDS_FLUSHED: &str = "timefront_records_flushed";
const STRAGGLERS: &str = "timefront_stragglers";
const ACCUMULATOR_DEPTH: &str = "timefront_accumulator_depth";
const FLUSH_BATCH_SIZE: &str = "timefront_flush_batch_size";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(TICKS, Unit::Count, "Virtual clock ticks that advanced the front");
    metrics::describe_counter!(
        LOOP_BACKS,
        Unit::Count,
        "Times the time front wrapped back to the virtual start"
    );
    metrics::describe_gauge!(
        VIRTUAL_TS,
        Unit::Milliseconds,
        "Current time front, milliseconds since the epoch"
    );
    metrics::describe_counter!(
        RECORDS_ADDED,
        Unit::Count,
        "Records accepted by the rectifier"
    );
    metrics::describe_counter!(
        RECORDS_FLUSHED,
        Unit::Count,
        "Records consumed by the rectifier sink"
    );
    metrics::describe_counter!(
        STRAGGLERS,
        Unit::Count,
        "Records that arrived below the last cutoff"
    );
    metrics::describe_gauge!(
        ACCUMULATOR_DEPTH,
        Unit::Count,
        "Records waiting in the rectifier"
    );
    metrics::describe_histogram!(
        FLUSH_BATCH_SIZE,
        Unit::Count,
        "Records offered to the sink per flush"
    );
}

/// Record a record accepted from a stream.
#[inline]
pub fn record_record_added(rectifier: &str, stream: &str) {
    counter!(RECORDS_ADDED, "rectifier" => rectifier.to_string(), "stream" => stream.to_string())
        .increment(1);
}

/// Record a late record from a stream.
#[inline]
pub fn record_straggler(rectifier: &str, stream: &str) {
    counter!(STRAGGLERS, "rectifier" => rectifier.to_string(), "stream" => stream.to_string())
        .increment(1);
}

/// Metrics handles for one virtual clock.
#[derive(Clone)]
pub struct ClockMetrics {
    name: String,
    ticks: Counter,
    loop_backs: Counter,
    virtual_ts: Gauge,
}

impl ClockMetrics {
    /// Create handles labelled with the clock name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ticks: counter!(TICKS, "clock" => name.to_string()),
            loop_backs: counter!(LOOP_BACKS, "clock" => name.to_string()),
            virtual_ts: gauge!(VIRTUAL_TS, "clock" => name.to_string()),
        }
    }

    /// Record an advancing tick and the resulting front.
    #[inline]
    pub fn record_tick(&self, time_front_millis: i64) {
        self.ticks.increment(1);
        self.virtual_ts.set(time_front_millis as f64);
    }

    /// Record a loop-back.
    #[inline]
    pub fn record_loop_back(&self) {
        self.loop_backs.increment(1);
    }

    /// Get the clock name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Metrics handles for one rectifier.
#[derive(Clone)]
pub struct RectifierMetrics {
    name: String,
    flushed: Counter,
    depth: Gauge,
    batch_size: Histogram,
}

impl RectifierMetrics {
    /// Create handles labelled with the rectifier name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flushed: counter!(RECORDS_FLUSHED, "rectifier" => name.to_string()),
            depth: gauge!(ACCUMULATOR_DEPTH, "rectifier" => name.to_string()),
            batch_size: histogram!(FLUSH_BATCH_SIZE, "rectifier" => name.to_string()),
        }
    }

    /// Record a record accepted from `stream`.
    #[inline]
    pub fn record_added(&self, stream: &str, depth: usize) {
        record_record_added(&self.name, stream);
        self.depth.set(depth as f64);
    }

    /// Record a late record from `stream`.
    #[inline]
    pub fn record_straggler(&self, stream: &str) {
        record_straggler(&self.name, stream);
    }

    /// Record a completed flush.
    #[inline]
    pub fn record_flush(&self, offered: usize, consumed: usize, depth: usize) {
        self.batch_size.record(offered as f64);
        self.flushed.increment(consumed as u64);
        self.depth.set(depth as f64);
    }

    /// Get the rectifier name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_clock_metrics() {
        let metrics = ClockMetrics::new("replay");
        metrics.record_tick(1_000);
        metrics.record_loop_back();
        assert_eq!(metrics.name(), "replay");
    }

    #[test]
    fn test_rectifier_metrics_without_recorder() {
        let metrics = RectifierMetrics::new("replay");
        metrics.record_added("trades", 1);
        metrics.record_straggler("trades");
        metrics.record_flush(3, 2, 1);
        assert_eq!(metrics.name(), "replay");
    }
}
