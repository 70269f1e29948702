//! Error types for the medical-warehouse library.
//!
//! Every fallible library operation returns [`WarehouseError`]. Each variant maps
//! to a stable, user-safe code through [`WarehouseError::code`] so the query layer
//! can report failures without leaking storage internals.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur anywhere in the pipeline.
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV writing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller-supplied parameter out of range or malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Channel is not present in the channel dimension
    #[error("Channel '{0}' not found")]
    ChannelNotFound(String),

    /// The object-detection model could not produce output
    #[error("Detection model unavailable: {0}")]
    ModelUnavailable(String),

    /// The upstream collector failed permanently
    #[error("Collector error for channel '{channel}': {reason}")]
    Collector {
        /// Channel whose fetch failed
        channel: String,
        /// Failure description
        reason: String,
    },

    /// Rate limit retries exhausted
    #[error("Retries exhausted for channel '{channel}' after {attempts} attempts (last wait {last_wait:?})")]
    RetriesExhausted {
        /// Channel whose fetch failed
        channel: String,
        /// Number of attempts made
        attempts: u32,
        /// Last backoff applied
        last_wait: Duration,
    },

    /// The run was cancelled between units of work
    #[error("Operation cancelled during {0}")]
    Cancelled(&'static str),
}

/// Convenience type alias for Result with WarehouseError
pub type Result<T> = std::result::Result<T, WarehouseError>;

impl WarehouseError {
    /// Stable error code surfaced to query-layer callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ChannelNotFound(_) => "NOT_FOUND",
            Self::InvalidConfig(_) => "CONFIG_ERROR",
            Self::Cancelled(_) => "CANCELLED",
            Self::Database(_)
            | Self::Pool(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Csv(_)
            | Self::ModelUnavailable(_)
            | Self::Collector { .. }
            | Self::RetriesExhausted { .. } => "SERVICE_ERROR",
        }
    }

    /// True when the error describes caller input rather than a system fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::ChannelNotFound(_))
    }
}

impl From<anyhow::Error> for WarehouseError {
    fn from(err: anyhow::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_hide_storage_details() {
        let err = WarehouseError::Database(rusqlite::Error::InvalidQuery);
        assert_eq!(err.code(), "SERVICE_ERROR");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_codes() {
        assert_eq!(WarehouseError::ChannelNotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(WarehouseError::InvalidInput("x".into()).code(), "INVALID_INPUT");
    }
}
