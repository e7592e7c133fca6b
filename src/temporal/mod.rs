//! Temporal types shared by the virtual clock and the rectifier.
//!
//! All times are millisecond timestamps since the Unix epoch. Calendar
//! boundaries (days and hours) are computed in UTC.

mod timestamp;

pub use timestamp::{MILLIS_IN_DAY, MILLIS_IN_HOUR, TimeRange, Timestamp, duration_millis};
