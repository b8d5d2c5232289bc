//! Error types for the alerter-proto crate.

use thiserror::Error;

/// Errors that can occur while decoding or validating messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The payload is not a well-formed alert message.
    #[error("malformed message: {reason}")]
    Malformed {
        /// Why the payload was rejected.
        reason: String,
    },

    /// A value was outside the accepted set.
    #[error("invalid {field}: {value}")]
    InvalidValue {
        /// The field that carried the value.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl ProtoError {
    /// Creates a [`ProtoError::Malformed`] with the given reason.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}
