//! Tracing integration for structured logging and spans.

use crate::virtual_time::ClockEvent;
use tracing::{Level, Span, span};

/// Create a span for a virtual clock.
///
/// # Example
///
/// ```rust
/// use timefront::observability::span_clock;
///
/// let span = span_clock("replay");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_clock(name: &str) -> Span {
    span!(Level::INFO, "virtual_clock", name = %name)
}

/// Create a span for a rectifier.
#[inline]
pub fn span_rectifier(name: &str) -> Span {
    span!(Level::INFO, "rectifier", name = %name)
}

/// Create a span for a single flush.
#[inline]
pub fn span_flush(name: &str, cutoff: i64) -> Span {
    span!(Level::TRACE, "flush", rectifier = %name, cutoff = cutoff)
}

/// Log a clock notification.
///
/// Synchronization and loop-backs log at info, calendar boundaries at debug.
#[inline]
pub fn trace_clock_event(clock: &str, event: &ClockEvent) {
    match event {
        ClockEvent::Synchronized | ClockEvent::LoopBack { .. } => {
            tracing::info!(clock = %clock, event = %event, "clock event");
        }
        ClockEvent::DateChanged(_) | ClockEvent::HourChanged(_) => {
            tracing::debug!(clock = %clock, event = %event, "clock event");
        }
    }
}

/// Log a component state change.
#[inline]
pub fn trace_state_change(component: &str, name: &str, from: &str, to: &str) {
    tracing::info!(
        component = %component,
        name = %name,
        from = %from,
        to = %to,
        "state changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_creation() {
        let _span = span_clock("replay");
        let _span = span_rectifier("replay");
        let _span = span_flush("replay", 100);
    }

    #[test]
    fn test_trace_functions() {
        trace_clock_event("replay", &ClockEvent::Synchronized);
        trace_clock_event("replay", &ClockEvent::LoopBack { loop_number: 1 });
        trace_state_change("clock", "replay", "locked", "running");
    }
}
