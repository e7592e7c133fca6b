//! # timefront
//!
//! Replay several independently fetched, timestamped event streams on one
//! controllable virtual timeline, and merge what they deliver into a single
//! time-ordered output.
//!
//! ## Features
//!
//! - **Virtual clock**: speed control, looping, day/hour boundary events,
//!   and a seamless switch to live mode once replay catches up with now
//! - **Producer-aware advance**: the time front never outruns the slowest
//!   registered stream
//! - **Rectifier**: a watermark-delayed reorder buffer that absorbs
//!   per-source latency and jitter
//! - **Deterministic tests**: injectable wall clock, Tokio paused time
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use timefront::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> timefront::Result<()> {
//! let wall = Arc::new(ManualClock::new(Timestamp::from_millis(10_000)));
//! let clock = VirtualClock::new(Timestamp::from_millis(0), &ClockConfig::default(), wall)?;
//!
//! let sink = Arc::new(MemorySink::new());
//! let rectifier = Rectifier::new(
//!     RectifierConfig::default().with_accumulation_time(std::time::Duration::from_millis(30)),
//!     Arc::new(clock.clone()),
//!     sink.clone(),
//! )?;
//!
//! for ts in [100, 50, 80, 120] {
//!     rectifier.add(EventRecord::at("ts", Timestamp::from_millis(ts)))?;
//! }
//! clock.set_virtual_ts(Timestamp::from_millis(150));
//! rectifier.flush().await?;
//! assert_eq!(sink.records().len(), 4);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod observability;
pub mod rectifier;
pub mod start_time;
pub mod temporal;
pub mod virtual_time;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock, TokioClock};
    pub use crate::config::{
        ClockConfig, ClockParam, RectifierConfig, StartTimeConfig, StragglerPolicy,
        TimefrontConfig,
    };
    pub use crate::coordinator::{Coordinator, StreamSubmitter};
    pub use crate::error::{Error, Result};
    pub use crate::rectifier::{
        CallbackSink, ChannelSink, EventRecord, MemorySink, RecordSink, Rectifier,
    };
    pub use crate::start_time::{CheckpointStore, MemoryCheckpoint, NoCheckpoint};
    pub use crate::temporal::{TimeRange, Timestamp};
    pub use crate::virtual_time::{ClockEvent, SharedFront, StreamFront, VirtualClock};
}

pub use error::{Error, Result};
