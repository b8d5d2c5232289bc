//! Service manager notifications.
//!
//! Every call is a no-op unless the daemon was started by systemd with
//! `NOTIFY_SOCKET` set, so running from a shell needs no special casing.

use std::time::Duration;

use sd_notify::NotifyState;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::shutdown::ShutdownRx;

/// Tell the service manager that startup finished.
pub fn notify_ready() {
    notify(&[NotifyState::Ready], "ready");
}

/// Tell the service manager that shutdown began.
pub fn notify_stopping() {
    notify(&[NotifyState::Stopping], "stopping");
}

/// Keep-alive interval for the watchdog, if the unit configures one.
///
/// Pings go out at half the configured timeout.
#[must_use]
pub fn watchdog_interval() -> Option<Duration> {
    let mut timeout_usec = 0;
    if sd_notify::watchdog_enabled(false, &mut timeout_usec) {
        Some(ping_interval(timeout_usec))
    } else {
        None
    }
}

/// Ping the watchdog every `period` until shutdown.
pub async fn run_watchdog(period: Duration, mut shutdown: ShutdownRx) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("watchdog stopped");
                break;
            }
            _ = ticker.tick() => notify(&[NotifyState::Watchdog], "watchdog"),
        }
    }
}

fn ping_interval(timeout_usec: u64) -> Duration {
    Duration::from_micros(timeout_usec / 2).max(Duration::from_millis(1))
}

fn notify(states: &[NotifyState<'_>], state: &str) {
    match sd_notify::notify(false, states) {
        Ok(()) => debug!(state, "notified service manager"),
        Err(e) => warn!(state, error = %e, "failed to notify service manager"),
    }
}
