//! Virtual time shared by a set of replayed streams.
//!
//! The [`VirtualClock`] advances a single *time front* at a configurable
//! speed, never beyond what every registered producer can deliver
//! ([`StreamFront`]) and never beyond the wall clock. Once it catches up with
//! the wall clock it rides it ("current time" mode). It can loop over a
//! fixed window of history and publishes [`ClockEvent`]s when it catches up,
//! loops, or crosses a day or hour boundary.
//!
//! The tick rules live in [`ClockCore`], a plain state machine that can be
//! driven without a runtime.

mod clock;
mod engine;
mod events;
mod front;

pub use clock::VirtualClock;
pub use engine::{ClockCore, ClockState, TickReport};
pub use events::{ClockEvent, DateChange, EventReceiver, EventSender, HourChange};
pub use front::{SharedFront, StreamFront};
