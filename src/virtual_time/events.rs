//! Virtual clock notifications.
//!
//! Each [`VirtualClock`](super::VirtualClock) owns its own broadcast
//! channel. Notifications are fire-and-forget: sending never blocks and a
//! clock without subscribers simply drops them.

use crate::temporal::Timestamp;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

/// A calendar day boundary crossed by the time front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateChange {
    /// Day number (days since the epoch) before the crossing.
    pub prev_day: i64,
    /// Day number after the crossing.
    pub curr_day: i64,
    /// Start of the previous day.
    pub prev_ts: Timestamp,
    /// Start of the current day.
    pub curr_ts: Timestamp,
}

/// An hour boundary crossed by the time front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourChange {
    /// Hour number (hours since the epoch) before the crossing.
    pub prev_hour: i64,
    /// Hour number after the crossing.
    pub curr_hour: i64,
    /// Previous hour of the UTC day (0..24).
    pub prev_hour_of_day: i64,
    /// Current hour of the UTC day (0..24).
    pub curr_hour_of_day: i64,
    /// Start of the previous hour.
    pub prev_ts: Timestamp,
    /// Start of the current hour.
    pub curr_ts: Timestamp,
}

/// Events emitted by the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClockEvent {
    /// The time front caught up with the wall clock.
    Synchronized,

    /// The time front wrapped back to the virtual start.
    LoopBack {
        /// Loop counter after the wrap.
        loop_number: u64,
    },

    /// The time front entered a new day.
    DateChanged(DateChange),

    /// The time front entered a different hour.
    HourChanged(HourChange),
}

impl fmt::Display for ClockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockEvent::Synchronized => write!(f, "virtual time synchronized with current time"),
            ClockEvent::LoopBack { loop_number } => write!(f, "loop-back #{}", loop_number),
            ClockEvent::DateChanged(c) => {
                write!(f, "date changed: day {} -> {}", c.prev_day, c.curr_day)
            }
            ClockEvent::HourChanged(c) => write!(
                f,
                "hour changed: {} -> {} ({:02}h -> {:02}h)",
                c.prev_hour, c.curr_hour, c.prev_hour_of_day, c.curr_hour_of_day
            ),
        }
    }
}

/// Sender for clock events.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<ClockEvent>,
}

impl EventSender {
    /// Create a new event sender with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event.
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if there are no receivers (which is fine).
    pub fn send(&self, event: ClockEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Create a receiver for events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver for clock events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<ClockEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the clock has been dropped.
    pub async fn recv(&mut self) -> Option<ClockEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "clock event receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<ClockEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every event currently queued.
    pub fn drain(&mut self) -> Vec<ClockEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
