//! Error types for alerterd.

use thiserror::Error;

/// Errors that can occur in daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Payload from a producer could not be decoded.
    #[error(transparent)]
    Malformed(#[from] alerter_proto::ProtoError),

    /// The webhook could not be reached.
    #[error("webhook unreachable: {0}")]
    DeliveryTransport(String),

    /// The webhook answered with a non-2xx status.
    #[error("webhook rejected delivery with status {status}")]
    DeliveryStatus {
        /// HTTP status code returned by the webhook.
        status: u16,
    },

    /// Reading or writing the queue file failed.
    #[error("queue persistence failed: {0}")]
    Persistence(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Returns true if the error is worth another delivery attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeliveryTransport(_) | Self::DeliveryStatus { .. }
        )
    }
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
