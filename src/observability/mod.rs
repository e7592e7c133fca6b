//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters, gauges, and histograms via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `timefront_ticks` | Counter | clock | Ticks that advanced the front |
//! | `timefront_loop_backs` | Counter | clock | Loop-backs to the virtual start |
//! | `timefront_virtual_ts` | Gauge | clock | Current time front (ms) |
//! | `timefront_records_added` | Counter | rectifier, stream | Records accepted |
//! | `timefront_records_flushed` | Counter | rectifier | Records consumed by the sink |
//! | `timefront_stragglers` | Counter | rectifier, stream | Records below the last cutoff |
//! | `timefront_accumulator_depth` | Gauge | rectifier | Records waiting |
//! | `timefront_flush_batch_size` | Histogram | rectifier | Records offered per flush |
//!
//! No recorder is installed by this crate; without one the calls are no-ops.
//!
//! ## Tracing
//!
//! Spans are emitted for the clock tick loop, the rectifier flush loop and
//! each individual flush. Installing a subscriber is left to the host.

mod metrics;
mod tracing_support;

pub use metrics::{
    ClockMetrics, RectifierMetrics, init_metrics, record_record_added, record_straggler,
};
pub use tracing_support::{
    span_clock, span_flush, span_rectifier, trace_clock_event, trace_state_change,
};
