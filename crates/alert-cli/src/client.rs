//! Socket client for the alerter daemon.
//!
//! The daemon expects one JSON message per connection and never replies, so
//! sending is connect, write, close.

use std::path::Path;

use alerter_proto::AlertRequest;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::CliError;

/// Sends one message to the daemon listening on `socket`.
///
/// # Errors
///
/// Returns `CliError::Connection` if the socket cannot be reached and
/// `CliError::Io` if the write fails.
pub async fn send(socket: &Path, request: &AlertRequest) -> Result<(), CliError> {
    let payload = serde_json::to_vec(request)?;

    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|source| CliError::Connection {
            path: socket.display().to_string(),
            source,
        })?;
    debug!(socket = %socket.display(), "connected to daemon");

    stream.write_all(&payload).await?;
    stream.shutdown().await?;

    debug!(bytes = payload.len(), "message sent");
    Ok(())
}
