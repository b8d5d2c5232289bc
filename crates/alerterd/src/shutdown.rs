//! Shutdown signalling.

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

/// Shutdown signal receiver.
pub type ShutdownRx = tokio::sync::broadcast::Receiver<()>;

/// Shutdown signal sender.
pub type ShutdownTx = tokio::sync::broadcast::Sender<()>;

/// Create a shutdown channel.
#[must_use]
pub fn channel() -> (ShutdownTx, ShutdownRx) {
    tokio::sync::broadcast::channel(1)
}

/// Wait for SIGINT, SIGTERM or SIGQUIT.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    debug!("signal handler ready");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, initiating shutdown"),
        _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
        _ = sigquit.recv() => info!("received SIGQUIT, initiating shutdown"),
    }

    Ok(())
}
