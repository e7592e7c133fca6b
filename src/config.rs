//! Typed configuration.
//!
//! Every component is built from a validated config struct. Values can come
//! from code, from any serde format, or from the process environment via
//! [`TimefrontConfig::from_env`]. Runtime changes go through
//! [`ClockParam`], which only accepts known keys.

use crate::error::{Error, Result};
use crate::temporal::Timestamp;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default tick period of the virtual clock.
pub const DEFAULT_TICK_INTERVAL_MILLIS: u64 = 3;

/// Default rectifier accumulation window (5 minutes).
pub const DEFAULT_ACCUMULATION_TIME_MILLIS: u64 = 300_000;

/// Default rectifier flush period.
pub const DEFAULT_SEND_INTERVAL_MILLIS: u64 = 10;

/// Default name of the field records are ordered by.
pub const DEFAULT_SORT_FIELD: &str = "ts";

// ============================================================================
// Clock
// ============================================================================

/// Virtual clock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockConfig {
    /// Replay speed multiplier. `0` means 1.
    pub speed: f64,
    /// Length of the replay loop in milliseconds. `0` disables looping.
    pub loop_time_millis: u64,
    /// Tick period in milliseconds.
    pub tick_interval_millis: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            loop_time_millis: 0,
            tick_interval_millis: DEFAULT_TICK_INTERVAL_MILLIS,
        }
    }
}

impl ClockConfig {
    /// Set the speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Set the loop length.
    pub fn with_loop_time_millis(mut self, millis: u64) -> Self {
        self.loop_time_millis = millis;
        self
    }

    /// Set the tick period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_millis = interval.as_millis() as u64;
        self
    }

    /// Tick period as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis)
    }

    /// Speed with the "0 means 1" rule applied.
    pub fn effective_speed(&self) -> f64 {
        effective_speed(self.speed)
    }

    /// Check the settings.
    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(Error::config("speed", format!("must be >= 0, got {}", self.speed)));
        }
        if self.tick_interval_millis == 0 {
            return Err(Error::config("tick_interval_millis", "must be greater than zero"));
        }
        if self.loop_time_millis > i64::MAX as u64 {
            return Err(Error::config("loop_time_millis", "out of range"));
        }
        Ok(())
    }
}

/// Replace a zero, negative or non-finite speed with 1.
pub(crate) fn effective_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 { speed } else { 1.0 }
}

// ============================================================================
// Rectifier
// ============================================================================

/// What the rectifier does with a record that arrives below the last cutoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StragglerPolicy {
    /// Keep it; it is emitted on the next flush, after later records.
    #[default]
    Accept,
    /// Refuse it with [`Error::StragglerRejected`].
    Reject,
}

/// Rectifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RectifierConfig {
    /// Virtual time a record is held before it may be flushed.
    pub accumulation_time_millis: u64,
    /// Wall time between flushes.
    pub send_interval_millis: u64,
    /// Field records are ordered by.
    pub sort_field: String,
    /// Handling of late records.
    pub straggler_policy: StragglerPolicy,
}

impl Default for RectifierConfig {
    fn default() -> Self {
        Self {
            accumulation_time_millis: DEFAULT_ACCUMULATION_TIME_MILLIS,
            send_interval_millis: DEFAULT_SEND_INTERVAL_MILLIS,
            sort_field: DEFAULT_SORT_FIELD.to_string(),
            straggler_policy: StragglerPolicy::Accept,
        }
    }
}

impl RectifierConfig {
    /// Set the accumulation window.
    pub fn with_accumulation_time(mut self, window: Duration) -> Self {
        self.accumulation_time_millis = window.as_millis() as u64;
        self
    }

    /// Set the flush period.
    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval_millis = interval.as_millis() as u64;
        self
    }

    /// Set the sort field.
    pub fn with_sort_field(mut self, field: impl Into<String>) -> Self {
        self.sort_field = field.into();
        self
    }

    /// Set the straggler policy.
    pub fn with_straggler_policy(mut self, policy: StragglerPolicy) -> Self {
        self.straggler_policy = policy;
        self
    }

    /// Accumulation window in milliseconds, as a signed offset.
    pub fn accumulation_millis(&self) -> i64 {
        i64::try_from(self.accumulation_time_millis).unwrap_or(i64::MAX)
    }

    /// Flush period as a `Duration`.
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_millis)
    }

    /// Check the settings.
    pub fn validate(&self) -> Result<()> {
        if self.accumulation_time_millis == 0 {
            return Err(Error::config("accumulation_time_millis", "must be greater than zero"));
        }
        if self.send_interval_millis == 0 {
            return Err(Error::config("send_interval_millis", "must be greater than zero"));
        }
        if self.sort_field.trim().is_empty() {
            return Err(Error::config("sort_field", "must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Start time
// ============================================================================

/// Where replay starts.
///
/// Resolution order: `start_before_millis`, `start_time`, the checkpoint
/// (when `use_checkpoint` is set), then the current time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartTimeConfig {
    /// Start this far in the past, relative to now.
    pub start_before_millis: Option<u64>,
    /// Start at an absolute time.
    pub start_time: Option<Timestamp>,
    /// Resume from the last checkpointed timestamp.
    pub use_checkpoint: bool,
}

// ============================================================================
// Aggregate
// ============================================================================

/// Complete configuration of a replay run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimefrontConfig {
    /// Virtual clock settings.
    pub clock: ClockConfig,
    /// Rectifier settings.
    pub rectifier: RectifierConfig,
    /// Start time settings.
    pub start: StartTimeConfig,
}

impl TimefrontConfig {
    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.clock.validate()?;
        self.rectifier.validate()
    }

    /// Read configuration from the process environment.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let num = |name: &str, default: u64| -> u64 {
            lookup(name)
                .and_then(|v| parse_env_number(&v))
                .filter(|v| *v >= 0.0)
                .map_or(default, |v| v.ceil() as u64)
        };

        let speed = lookup("STREAM_SPEED")
            .and_then(|v| parse_env_number(&v))
            .unwrap_or(defaults.clock.speed);

        let start_before_millis = match lookup("STREAM_TIME_START_BEFORE") {
            Some(v) if !v.trim().is_empty() => match crate::start_time::parse_time_param(&v) {
                Some(d) => Some(d.as_millis() as u64),
                None => {
                    tracing::error!(value = %v, "start time is incorrect: STREAM_TIME_START_BEFORE");
                    None
                }
            },
            _ => None,
        };
        let start_time = match lookup("STREAM_TIME_START") {
            Some(v) if !v.trim().is_empty() => match Timestamp::parse_iso(&v) {
                Some(ts) => Some(ts),
                None => {
                    tracing::error!(value = %v, "start time is incorrect: STREAM_TIME_START");
                    None
                }
            },
            _ => None,
        };

        let config = Self {
            clock: ClockConfig {
                speed,
                loop_time_millis: num("STREAM_LOOP_TIME_MILLIS", defaults.clock.loop_time_millis),
                tick_interval_millis: num(
                    "TIME_FRONT_UPDATE_INTERVAL_MILLIS",
                    defaults.clock.tick_interval_millis,
                ),
            },
            rectifier: RectifierConfig {
                accumulation_time_millis: num(
                    "RECTIFIER_ACCUMULATION_TIME_MILLIS",
                    defaults.rectifier.accumulation_time_millis,
                ),
                send_interval_millis: num(
                    "RECTIFIER_SEND_INTERVAL_MILLIS",
                    defaults.rectifier.send_interval_millis,
                ),
                sort_field: lookup("RECTIFIER_FIELD_NAME_TO_SORT")
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or(defaults.rectifier.sort_field),
                straggler_policy: match lookup("RECTIFIER_STRAGGLER_POLICY").as_deref() {
                    Some("reject") => StragglerPolicy::Reject,
                    _ => StragglerPolicy::Accept,
                },
            },
            start: StartTimeConfig {
                start_before_millis,
                start_time,
                use_checkpoint: lookup("STREAM_USE_START_TIME_FROM_CHECKPOINT")
                    .is_some_and(|v| parse_bool(&v)),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a numeric environment value, allowing `_` digit separators.
fn parse_env_number(value: &str) -> Option<f64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

// ============================================================================
// Runtime parameters
// ============================================================================

/// A virtual clock setting that can be changed while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockParam {
    /// Replay speed (floored, at least 1).
    Speed,
    /// Loop length in milliseconds.
    LoopTimeMillis,
    /// Tick period in milliseconds.
    TickIntervalMillis,
}

impl ClockParam {
    /// Canonical key.
    pub fn key(self) -> &'static str {
        match self {
            ClockParam::Speed => "speed",
            ClockParam::LoopTimeMillis => "STREAM_LOOP_TIME_MILLIS",
            ClockParam::TickIntervalMillis => "STREAM_TIME_FRONT_UPDATE_INTERVAL_MILLIS",
        }
    }
}

impl FromStr for ClockParam {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        match key {
            "speed" | "STREAM_SPEED" => Ok(ClockParam::Speed),
            "loopTimeMillis" | "STREAM_LOOP_TIME_MILLIS" => Ok(ClockParam::LoopTimeMillis),
            "tickIntervalMillis" | "STREAM_TIME_FRONT_UPDATE_INTERVAL_MILLIS" => {
                Ok(ClockParam::TickIntervalMillis)
            }
            other => Err(Error::UnknownParam(other.to_string())),
        }
    }
}

/// Read a number from a JSON number or numeric string.
pub(crate) fn param_number(key: &str, value: &serde_json::Value) -> Result<f64> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_env_number(s),
        _ => None,
    };
    number.ok_or_else(|| Error::param(key, format!("expected a number, got {}", value)))
}
