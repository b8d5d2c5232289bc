//! Daemon wiring: listener and dispatcher joined by the intake channel.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::delivery::DeliveryEngine;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::listener::Listener;
use crate::queue::DurableQueue;
use crate::shutdown::ShutdownTx;

/// Messages decoded by the listener but not yet picked up by the dispatcher.
const INTAKE_CAPACITY: usize = 1024;

/// Used when neither the config nor the system provides a name.
const FALLBACK_USERNAME: &str = "alerter";

/// A configured daemon, ready to run.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    username: String,
    queue: DurableQueue,
    engine: DeliveryEngine,
    listener: Listener,
}

impl Daemon {
    /// Validates the config, resolves the posting name, loads the queue and
    /// binds the socket. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, the queue cannot be read,
    /// the HTTP client cannot be built or the socket cannot be bound.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        config.validate()?;

        let username = config.username.clone().unwrap_or_else(system_hostname);
        let queue = DurableQueue::open(&config.queue_path)?;
        let engine = DeliveryEngine::new(&config.webhook_url, &config.retry)?;
        let listener = Listener::bind(&config.socket_path, &config.listener)?;

        Ok(Self {
            config,
            username,
            queue,
            engine,
            listener,
        })
    }

    /// Name posted as the author of every message.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Number of messages loaded from the queue file.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Runs until `shutdown` fires, then lets the dispatcher drain.
    pub async fn run(self, shutdown: &ShutdownTx) {
        let listener = self.listener;
        let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);

        info!(
            socket = %listener.path().display(),
            webhook = %self.engine.webhook_url(),
            queue = %self.queue.path().display(),
            queued = self.queue.len(),
            username = %self.username,
            "alerterd running"
        );

        let dispatcher = Dispatcher::new(
            &self.config,
            self.queue,
            self.engine,
            self.username,
            intake_rx,
            shutdown.subscribe(),
        );

        let listener_task = tokio::spawn(listener.run(intake_tx, shutdown.subscribe()));
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let (listener_done, dispatcher_done) = tokio::join!(listener_task, dispatcher_task);
        if let Err(e) = listener_done {
            error!(error = %e, "listener task failed");
        }
        if let Err(e) = dispatcher_done {
            error!(error = %e, "dispatcher task failed");
        }

        info!("alerterd stopped");
    }
}

fn system_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, fallback = FALLBACK_USERNAME, "could not resolve hostname");
            FALLBACK_USERNAME.to_string()
        }
    }
}
