//! Unix socket intake.
//!
//! Each connection carries exactly one JSON message: the producer writes it
//! and closes its end. The daemon never answers. Anything that cannot be
//! decoded is logged and dropped without affecting other connections.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alerter_proto::Message;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::clock::ReceiveClock;
use crate::config::ListenerConfig;
use crate::error::{DaemonError, Result};
use crate::shutdown::ShutdownRx;
use crate::DAEMON_VERSION;

/// Extra time, beyond the read timeout, that open connections get to finish
/// decoding and hand their message over on shutdown.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

/// Bound Unix socket accepting producer connections.
#[derive(Debug)]
pub struct Listener {
    listener: UnixListener,
    path: PathBuf,
    limits: ListenerConfig,
    clock: Arc<ReceiveClock>,
}

impl Listener {
    /// Binds the socket at `path`.
    ///
    /// A stale socket file left by a previous run is removed first and the
    /// parent directory is created if needed.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Io` if the socket cannot be bound or its
    /// permissions cannot be set.
    pub fn bind(path: impl Into<PathBuf>, limits: &ListenerConfig) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(limits.socket_mode))?;

        let mode = format!("{:o}", limits.socket_mode);
        info!(path = %path.display(), mode = %mode, "listening for messages");

        Ok(Self {
            listener,
            path,
            limits: limits.clone(),
            clock: Arc::new(ReceiveClock::new()),
        })
    }

    /// Returns the socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until shutdown, forwarding decoded messages to
    /// `intake`. Removes the socket file on exit.
    ///
    /// On shutdown no new connections are accepted, but open ones still get
    /// to finish. `intake` is released only after they are done, so the
    /// receiving side sees the channel close once every accepted message
    /// has been handed over.
    pub async fn run(self, intake: mpsc::Sender<Message>, mut shutdown: ShutdownRx) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            connections.spawn(handle_connection(
                                stream,
                                self.limits.clone(),
                                Arc::clone(&self.clock),
                                intake.clone(),
                            ));
                        }
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        if !connections.is_empty() {
            debug!(open = connections.len(), "waiting for open connections");
            let finished = timeout(self.limits.read_timeout() + SHUTDOWN_SLACK, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if finished.is_err() {
                warn!(open = connections.len(), "abandoning connections that did not finish");
                connections.abort_all();
            }
        }
        drop(intake);

        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket");
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    limits: ListenerConfig,
    clock: Arc<ReceiveClock>,
    intake: mpsc::Sender<Message>,
) {
    let bytes = match read_payload(stream, &limits).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "dropping connection");
            return;
        }
    };

    if bytes.is_empty() {
        debug!("connection closed without a message");
        return;
    }

    let message = match alerter_proto::decode(&bytes, clock.now(), DAEMON_VERSION) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %DaemonError::from(e), bytes = bytes.len(), "dropping malformed message");
            return;
        }
    };

    debug!(
        level = %message.level(),
        channel = message.channel().unwrap_or("-"),
        "received message"
    );
    if intake.send(message).await.is_err() {
        warn!("dispatcher stopped, dropping message");
    }
}

/// Reads until the producer closes its end, enforcing size and time limits.
async fn read_payload(mut stream: UnixStream, limits: &ListenerConfig) -> io::Result<Vec<u8>> {
    let max = limits.max_message_bytes;
    let mut buf = Vec::new();
    let mut bounded = (&mut stream).take(max as u64 + 1);

    timeout(limits.read_timeout(), bounded.read_to_end(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "producer did not close in time"))??;

    if buf.len() > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message exceeds {max} bytes"),
        ));
    }

    Ok(buf)
}
