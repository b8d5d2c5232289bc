//! CLI error types.

use thiserror::Error;

/// Errors the `alert` command can report.
#[derive(Debug, Error)]
pub enum CliError {
    /// An argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The daemon socket could not be reached.
    #[error("cannot connect to {path}: {source}")]
    Connection {
        /// Socket path that was tried.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The message could not be encoded.
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// IO error while sending.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
