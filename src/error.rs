//! Error types for timefront.

use thiserror::Error;

/// Result type alias using timefront's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for timefront operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration field failed validation.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A runtime parameter key is not known.
    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    /// A runtime parameter value could not be applied.
    #[error("invalid value for parameter {key}: {reason}")]
    InvalidParam {
        /// Parameter key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A record does not carry a usable sort field.
    #[error("record has no usable sort field '{0}'")]
    MissingSortField(String),

    /// A record arrived below the current cutoff and stragglers are rejected.
    #[error("straggler rejected: key {key} is below cutoff {cutoff}")]
    StragglerRejected {
        /// Sort key of the late record.
        key: i64,
        /// Cutoff at the time of submission.
        cutoff: i64,
    },

    /// The start time could not be parsed.
    #[error("invalid start time: {0}")]
    InvalidStartTime(String),

    /// A checkpoint store operation failed.
    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    /// The component is already running.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// The component has been stopped and cannot be restarted.
    #[error("{0} has been stopped")]
    Stopped(&'static str),

    /// JSON error while reading records or parameters.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn param(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("accumulation_time", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid configuration: accumulation_time: must be greater than zero"
        );

        let err = Error::StragglerRejected { key: 10, cutoff: 20 };
        assert_eq!(
            err.to_string(),
            "straggler rejected: key 10 is below cutoff 20"
        );
    }
}
