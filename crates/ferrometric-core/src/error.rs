use thiserror::Error;

use crate::catalog::DiscoveryError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Validation errors for domain values and configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    EmptyComponent { field: &'static str },
    #[error("{field} length {len} exceeds max {max}")]
    ComponentTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{field} contains invalid character '{ch}' at index {index}")]
    ComponentInvalidChar {
        field: &'static str,
        ch: char,
        index: usize,
    },

    #[error("field '{key}' is listed more than once")]
    DuplicateField { key: String },

    #[error("invalid resolution '{value}', expected one of hour, day")]
    InvalidResolution { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z) or YYYY-MM-DD: '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp {millis}ms is out of range")]
    TimestampOutOfRange { millis: i64 },

    #[error("fetch window [{start}, {end}) is empty")]
    EmptyWindow { start: String, end: String },
}

/// Run-level error: the run was aborted and its report is incomplete.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The store reported a possible partial write; continuing could advance a
    /// watermark past data that is not stored.
    #[error("storage integrity violation on series '{series_id}': {source}")]
    Integrity {
        series_id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("series discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("series task panicked or was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}
