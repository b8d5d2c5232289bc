//! alerterd - alert forwarding daemon
//!
//! Producers drop one JSON message per connection on a local Unix socket.
//! The daemon renders each message as a chat attachment and posts it to a
//! webhook. Failed deliveries are retried, stored in a durable queue and
//! retried again until they get through, across restarts.
//!
//! # Components
//!
//! - [`listener`]: socket intake and decoding
//! - [`dispatcher`]: single owner of the queue, one task per delivery
//! - [`delivery`]: webhook POST with a bounded retry budget
//! - [`queue`]: JSON-lines queue file

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod daemon;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod systemd;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use delivery::DeliveryEngine;
pub use dispatcher::{DeliveryEvent, Dispatcher};
pub use error::{DaemonError, Result};
pub use listener::Listener;
pub use queue::{DurableQueue, QueueEntry};

/// Version stamped into every message footer.
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");
