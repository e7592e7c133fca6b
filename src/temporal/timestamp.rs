//! Timestamp and time range types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::Duration;

/// Milliseconds in one calendar day (UTC).
pub const MILLIS_IN_DAY: i64 = 86_400_000;

/// Milliseconds in one hour.
pub const MILLIS_IN_HOUR: i64 = 3_600_000;

/// A timestamp in milliseconds since the Unix epoch.
///
/// Both virtual time and wall-clock time are expressed with this type.
/// Arithmetic saturates instead of overflowing.
///
/// # Examples
///
/// ```rust
/// use timefront::temporal::Timestamp;
///
/// let ts = Timestamp::from_millis(86_400_001);
/// assert_eq!(ts.day_number(), 1);
/// assert_eq!(ts.to_string(), "1970-01-02T00:00:00.001Z");
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const ZERO: Self = Self(0);

    /// Largest representable timestamp.
    pub const MAX: Self = Self(i64::MAX);

    /// Create a timestamp from milliseconds since the epoch.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from whole seconds since the epoch.
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Number of whole days since the epoch.
    #[inline]
    pub const fn day_number(self) -> i64 {
        self.0.div_euclid(MILLIS_IN_DAY)
    }

    /// Number of whole hours since the epoch.
    #[inline]
    pub const fn hour_number(self) -> i64 {
        self.0.div_euclid(MILLIS_IN_HOUR)
    }

    /// Hour of the UTC day (0..24).
    #[inline]
    pub const fn hour_of_day(self) -> i64 {
        self.hour_number().rem_euclid(24)
    }

    /// Add milliseconds, saturating at the numeric bounds.
    #[inline]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Subtract milliseconds, saturating at the numeric bounds.
    #[inline]
    pub const fn saturating_sub_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Signed distance `self - earlier` in milliseconds.
    #[inline]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Convert to a chrono UTC date-time, if in chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Parse an RFC 3339 / ISO-8601 date-time.
    ///
    /// A value without an offset is interpreted as UTC.
    pub fn parse_iso(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self(dt.timestamp_millis()));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
                return Some(Self(naive.and_utc().timestamp_millis()));
            }
        }
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Self(naive.and_utc().timestamp_millis()))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_millis(duration_millis(rhs))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub_millis(duration_millis(rhs))
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    /// Non-negative distance; zero when `rhs` is later.
    fn sub(self, rhs: Timestamp) -> Self::Output {
        Duration::from_millis(self.millis_since(rhs).max(0) as u64)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Whole milliseconds of a duration, saturating at `i64::MAX`.
#[inline]
pub fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// A closed time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub start: Timestamp,
    /// End of the range (inclusive).
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start <= end, "start must be <= end");
        Self { start, end }
    }

    /// A range covering a single instant.
    pub fn at(ts: Timestamp) -> Self {
        Self { start: ts, end: ts }
    }

    /// Width of the range.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if a timestamp is within this range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Extend the range to include a timestamp.
    pub fn extend_to(&mut self, ts: Timestamp) {
        if ts < self.start {
            self.start = ts;
        }
        if ts > self.end {
            self.end = ts;
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_day_and_hour_numbers() {
        let ts = Timestamp::from_millis(86_399_999);
        assert_eq!(ts.day_number(), 0);
        assert_eq!(ts.hour_number(), 23);
        assert_eq!(ts.hour_of_day(), 23);

        let ts = Timestamp::from_millis(86_400_001);
        assert_eq!(ts.day_number(), 1);
        assert_eq!(ts.hour_number(), 24);
        assert_eq!(ts.hour_of_day(), 0);
    }

    #[test]
    fn test_timestamp_negative_numbers_floor() {
        let ts = Timestamp::from_millis(-1);
        assert_eq!(ts.day_number(), -1);
        assert_eq!(ts.hour_of_day(), 23);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let ts = Timestamp::from_millis(1_000);
        assert_eq!(ts + Duration::from_millis(500), Timestamp::from_millis(1_500));
        assert_eq!(ts - Duration::from_millis(1_500), Timestamp::from_millis(-500));
        assert_eq!(Timestamp::from_millis(1_500) - ts, Duration::from_millis(500));
        assert_eq!(ts - Timestamp::from_millis(1_500), Duration::ZERO);
        assert_eq!(Timestamp::MAX.saturating_add_millis(1), Timestamp::MAX);
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::ZERO.to_string(), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            Timestamp::from_millis(1_700_000_000_123).to_string(),
            "2023-11-14T22:13:20.123Z"
        );
    }

    #[test]
    fn test_timestamp_parse_iso() {
        assert_eq!(
            Timestamp::parse_iso("2023-11-14T22:13:20.123Z"),
            Some(Timestamp::from_millis(1_700_000_000_123))
        );
        assert_eq!(
            Timestamp::parse_iso("2023-11-15T00:13:20+02:00"),
            Some(Timestamp::from_millis(1_700_000_000_000))
        );
        // No offset means UTC.
        assert_eq!(
            Timestamp::parse_iso("2023-11-14T22:13:20"),
            Some(Timestamp::from_millis(1_700_000_000_000))
        );
        assert_eq!(
            Timestamp::parse_iso("1970-01-02"),
            Some(Timestamp::from_millis(MILLIS_IN_DAY))
        );
        assert_eq!(Timestamp::parse_iso("yesterday"), None);
    }

    #[test]
    fn test_time_range() {
        let mut range = TimeRange::at(Timestamp::from_millis(100));
        range.extend_to(Timestamp::from_millis(50));
        range.extend_to(Timestamp::from_millis(120));
        assert_eq!(range.start, Timestamp::from_millis(50));
        assert_eq!(range.end, Timestamp::from_millis(120));
        assert!(range.contains(Timestamp::from_millis(120)));
        assert!(!range.contains(Timestamp::from_millis(121)));
        assert_eq!(range.duration(), Duration::from_millis(70));
    }
}
