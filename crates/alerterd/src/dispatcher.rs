//! Dispatcher: the single owner of the durable queue.
//!
//! Every message, fresh from the listener or resumed from disk, becomes a
//! [`QueueEntry`] and gets its own delivery task. Tasks never touch the
//! queue; they report [`DeliveryEvent`]s back and the dispatcher applies
//! them one at a time:
//!
//! - `Persist` after the first failed attempt of a fresh entry
//! - `Delivered` once the webhook accepted it
//! - `Exhausted` when the retry budget ran out; the entry is requeued after
//!   a growing backoff and is never dropped

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use alerter_proto::{render, Message};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::delivery::DeliveryEngine;
use crate::queue::{DurableQueue, QueueEntry};
use crate::retry::RequeueBackoff;
use crate::shutdown::ShutdownRx;

/// Progress reported by a delivery task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// The first attempt failed; the entry must outlive the retry loop.
    Persist(QueueEntry),
    /// The webhook accepted the entry.
    Delivered {
        /// Entry id.
        id: Uuid,
        /// Attempts made across all rounds.
        attempts: u32,
    },
    /// The retry budget ran out. Carries the updated attempt count.
    Exhausted(QueueEntry),
}

/// Coordinates delivery tasks and owns the queue file.
pub struct Dispatcher {
    queue: DurableQueue,
    engine: DeliveryEngine,
    username: Arc<str>,
    intake: mpsc::Receiver<Message>,
    events_tx: mpsc::UnboundedSender<DeliveryEvent>,
    events_rx: mpsc::UnboundedReceiver<DeliveryEvent>,
    tasks: JoinSet<()>,
    in_flight: HashMap<Uuid, QueueEntry>,
    waiting: VecDeque<QueueEntry>,
    requeue_at: Option<Instant>,
    backoff: RequeueBackoff,
    grace: Duration,
    shutdown: ShutdownRx,
}

impl Dispatcher {
    /// Creates a dispatcher. Nothing runs until [`Dispatcher::run`].
    pub fn new(
        config: &DaemonConfig,
        queue: DurableQueue,
        engine: DeliveryEngine,
        username: impl Into<Arc<str>>,
        intake: mpsc::Receiver<Message>,
        shutdown: ShutdownRx,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            queue,
            engine,
            username: username.into(),
            intake,
            events_tx,
            events_rx,
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            waiting: VecDeque::new(),
            requeue_at: None,
            backoff: RequeueBackoff::from(&config.requeue),
            grace: config.shutdown_grace(),
            shutdown,
        }
    }

    /// Returns the number of entries currently being delivered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resubmits stored entries, then processes messages and delivery
    /// events until shutdown.
    pub async fn run(mut self) {
        self.resume_pending();

        let mut intake_open = true;
        loop {
            let requeue_at = self.requeue_at;
            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => {
                    self.apply(event, true);
                }

                _ = self.shutdown.recv() => {
                    debug!("dispatcher shutting down");
                    break;
                }

                message = self.intake.recv(), if intake_open => {
                    match message {
                        Some(message) => self.submit(QueueEntry::new(message)),
                        None => {
                            debug!("intake closed");
                            intake_open = false;
                        }
                    }
                }

                () = sleep_until(requeue_at.unwrap_or_else(Instant::now)), if requeue_at.is_some() => {
                    self.requeue_waiting();
                }

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "delivery task failed");
                    }
                }
            }
        }

        self.drain().await;
    }

    fn resume_pending(&mut self) {
        let pending = self.queue.entries().to_vec();
        if !pending.is_empty() {
            info!(count = pending.len(), "resubmitting queued messages");
        }
        for entry in pending {
            self.submit(entry);
        }
    }

    fn submit(&mut self, entry: QueueEntry) {
        debug!(id = %entry.id, attempts = entry.attempts, "submitting message for delivery");
        self.in_flight.insert(entry.id, entry.clone());
        self.tasks.spawn(deliver_entry(
            self.engine.clone(),
            Arc::clone(&self.username),
            entry,
            self.events_tx.clone(),
        ));
    }

    fn requeue_waiting(&mut self) {
        self.requeue_at = None;
        let round: Vec<_> = self.waiting.drain(..).collect();
        info!(count = round.len(), "retrying queued messages");
        for entry in round {
            self.submit(entry);
        }
    }

    fn apply(&mut self, event: DeliveryEvent, requeue: bool) {
        match event {
            DeliveryEvent::Persist(entry) => {
                if let Some(tracked) = self.in_flight.get_mut(&entry.id) {
                    tracked.attempts = entry.attempts;
                }
                if let Err(e) = self.queue.append(entry) {
                    error!(error = %e, "failed to persist message, it will not survive a restart");
                }
            }
            DeliveryEvent::Delivered { id, attempts } => {
                self.in_flight.remove(&id);
                info!(id = %id, attempts, "message delivered");
                if let Err(e) = self.queue.remove(id) {
                    error!(error = %e, "failed to remove delivered message from queue");
                }
                self.backoff.reset();
            }
            DeliveryEvent::Exhausted(entry) => {
                self.in_flight.remove(&entry.id);
                warn!(id = %entry.id, attempts = entry.attempts, "retry budget exhausted, requeueing");
                if let Err(e) = self.queue.append(entry.clone()) {
                    error!(error = %e, "failed to persist requeued message");
                }
                if requeue {
                    self.waiting.push_back(entry);
                    if self.requeue_at.is_none() {
                        self.requeue_at = Some(Instant::now() + self.backoff.current());
                        self.backoff.backoff();
                    }
                }
            }
        }
    }

    /// Gives in-flight deliveries the grace period, then stores whatever is
    /// still undelivered.
    async fn drain(mut self) {
        // The listener lets open connections finish before it drops its
        // sender, so everything accepted before shutdown arrives here.
        while let Some(message) = self.intake.recv().await {
            self.submit(QueueEntry::new(message));
        }

        if !self.in_flight.is_empty() {
            info!(
                in_flight = self.in_flight.len(),
                grace_ms = self.grace.as_millis() as u64,
                "waiting for in-flight deliveries"
            );
        }

        let deadline = Instant::now() + self.grace;
        while !self.in_flight.is_empty() {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.apply(event, false),
                () = sleep_until(deadline) => break,
            }
        }

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event, false);
        }

        let unfinished: Vec<_> = self.in_flight.drain().map(|(_, entry)| entry).collect();
        for entry in unfinished {
            if self.queue.contains(entry.id) {
                continue;
            }
            if let Err(e) = self.queue.append(entry) {
                error!(error = %e, "failed to store in-flight message on shutdown");
            }
        }

        match self.queue.len() {
            0 => info!("dispatcher stopped, queue is empty"),
            n => warn!(queued = n, "dispatcher stopped with queued messages"),
        }
    }
}

/// Renders and delivers one entry, reporting progress to the dispatcher.
async fn deliver_entry(
    engine: DeliveryEngine,
    username: Arc<str>,
    mut entry: QueueEntry,
    events: mpsc::UnboundedSender<DeliveryEvent>,
) {
    let payload = render(&entry.message, &username);
    let previous = entry.attempts;
    let fresh = previous == 0;

    let (attempts, result) = engine
        .deliver(&payload, |attempt, _| {
            if fresh && attempt == 1 {
                let mut stored = entry.clone();
                stored.attempts = 1;
                report(&events, DeliveryEvent::Persist(stored));
            }
        })
        .await;

    entry.attempts = previous.saturating_add(attempts);
    let event = match result {
        Ok(()) => DeliveryEvent::Delivered {
            id: entry.id,
            attempts: entry.attempts,
        },
        Err(_) => DeliveryEvent::Exhausted(entry),
    };
    report(&events, event);
}

fn report(events: &mpsc::UnboundedSender<DeliveryEvent>, event: DeliveryEvent) {
    if events.send(event).is_err() {
        debug!("dispatcher gone, dropping delivery event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RequeueConfig, RetryConfig};
    use crate::shutdown;
    use alerter_proto::AlertRequest;
    use chrono::Utc;
    use std::path::Path;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        intake: mpsc::Sender<Message>,
        shutdown: shutdown::ShutdownTx,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        async fn stop(self) {
            let Self {
                intake,
                shutdown,
                handle,
            } = self;
            let _ = shutdown.send(());
            drop(intake);
            handle.await.expect("dispatcher task");
        }
    }

    fn config(server: &MockServer, queue_path: &Path) -> DaemonConfig {
        let mut config = DaemonConfig::new("/unused.sock", server.uri(), queue_path);
        config.retry = RetryConfig {
            max_attempts: 3,
            delay_ms: 10,
            request_timeout_secs: 30,
        };
        config.requeue = RequeueConfig {
            initial_delay_secs: 1,
            max_delay_secs: 1,
            backoff_multiplier: 1.0,
        };
        config.shutdown_grace_secs = 0;
        config
    }

    fn start(config: &DaemonConfig) -> Harness {
        let queue = DurableQueue::open(&config.queue_path).expect("open queue");
        let engine = DeliveryEngine::new(&config.webhook_url, &config.retry).expect("engine");
        let (intake, intake_rx) = mpsc::channel(16);
        let (shutdown, shutdown_rx) = shutdown::channel();
        let dispatcher = Dispatcher::new(config, queue, engine, "test-host", intake_rx, shutdown_rx);
        let handle = tokio::spawn(dispatcher.run());
        Harness {
            intake,
            shutdown,
            handle,
        }
    }

    fn message(text: &str) -> Message {
        Message::from_request(AlertRequest::new(text), Utc::now(), "0.1.0").expect("valid")
    }

    async fn wait_for_requests(server: &MockServer, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let seen = server.received_requests().await.map_or(0, |r| r.len());
            if seen >= count {
                return;
            }
            assert!(Instant::now() < deadline, "saw {seen} of {count} requests");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_for_queue_len(path: &Path, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if stored_entries(path) == len {
                return;
            }
            assert!(Instant::now() < deadline, "queue never reached {len} entries");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Counts records without opening the queue, which could compact a file
    /// still being written.
    fn stored_entries(path: &Path) -> usize {
        std::fs::read_to_string(path).map_or(0, |content| {
            content.lines().filter(|line| !line.trim().is_empty()).count()
        })
    }

    #[tokio::test]
    async fn test_fresh_message_delivered_without_queueing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_path = dir.path().join("queue");

        let harness = start(&config(&server, &queue_path));
        harness.intake.send(message("test")).await.expect("send");
        wait_for_requests(&server, 1).await;
        harness.stop().await;

        assert!(!queue_path.exists());
    }

    #[tokio::test]
    async fn test_failed_then_delivered_leaves_empty_queue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_path = dir.path().join("queue");

        let harness = start(&config(&server, &queue_path));
        harness.intake.send(message("simple")).await.expect("send");
        wait_for_requests(&server, 3).await;
        wait_for_queue_len(&queue_path, 0).await;
        harness.stop().await;

        let requests = server.received_requests().await.expect("recording");
        assert_eq!(requests.len(), 3);
        assert_eq!(std::fs::read_to_string(&queue_path).expect("queue file"), "");
    }

    #[tokio::test]
    async fn test_exhausted_message_is_requeued_not_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_path = dir.path().join("queue");
        let mut config = config(&server, &queue_path);
        config.retry.max_attempts = 1;

        let harness = start(&config);
        harness.intake.send(message("down")).await.expect("send");
        // First round, then a second round after the requeue delay.
        wait_for_requests(&server, 2).await;
        harness.stop().await;

        let queue = DurableQueue::open(&queue_path).expect("reopen");
        assert_eq!(queue.len(), 1);
        assert!(queue.entries()[0].attempts >= 1);
        assert_eq!(queue.entries()[0].message.text(), "down");
    }

    #[tokio::test]
    async fn test_stored_entries_are_resubmitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_path = dir.path().join("queue");
        {
            let mut queue = DurableQueue::open(&queue_path).expect("open");
            for text in ["one", "two"] {
                let mut entry = QueueEntry::new(message(text));
                entry.attempts = 1;
                queue.append(entry).expect("append");
            }
        }

        let harness = start(&config(&server, &queue_path));
        wait_for_requests(&server, 2).await;
        wait_for_queue_len(&queue_path, 0).await;
        harness.stop().await;

        assert_eq!(std::fs::read_to_string(&queue_path).expect("queue file"), "");
    }

    #[tokio::test]
    async fn test_empty_queue_triggers_no_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("queue"), "").expect("write");

        let harness = start(&config(&server, &dir.path().join("queue")));
        tokio::time::sleep(Duration::from_millis(200)).await;
        harness.stop().await;

        let requests = server.received_requests().await.expect("recording");
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stores_in_flight_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_path = dir.path().join("queue");

        let harness = start(&config(&server, &queue_path));
        harness.intake.send(message("slow")).await.expect("send");
        wait_for_requests(&server, 1).await;
        harness.stop().await;

        let queue = DurableQueue::open(&queue_path).expect("reopen");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].message.text(), "slow");
    }

    #[tokio::test]
    async fn test_message_handed_over_after_shutdown_is_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let queue_path = dir.path().join("queue");
        let mut config = config(&server, &queue_path);
        config.shutdown_grace_secs = 5;

        let Harness {
            intake,
            shutdown,
            handle,
        } = start(&config);
        shutdown.send(()).expect("send shutdown");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A connection that was still being read when shutdown began.
        intake.send(message("late")).await.expect("intake still open");
        drop(intake);
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("dispatcher stops once intake closes")
            .expect("dispatcher task");

        let requests = server.received_requests().await.expect("recording");
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
        assert_eq!(body["attachments"][0]["text"], "late");
        assert_eq!(stored_entries(&queue_path), 0);
    }

    #[tokio::test]
    async fn test_deliver_entry_reports_persist_once_for_fresh_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let engine = DeliveryEngine::new(
            server.uri(),
            &RetryConfig {
                max_attempts: 3,
                delay_ms: 1,
                request_timeout_secs: 5,
            },
        )
        .expect("engine");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let entry = QueueEntry::new(message("x"));

        deliver_entry(engine, Arc::from("h"), entry.clone(), tx).await;

        let first = rx.recv().await.expect("persist event");
        assert!(matches!(&first, DeliveryEvent::Persist(e) if e.id == entry.id && e.attempts == 1));
        let second = rx.recv().await.expect("exhausted event");
        assert!(matches!(&second, DeliveryEvent::Exhausted(e) if e.attempts == 3));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_entry_skips_persist_for_stored_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let engine = DeliveryEngine::new(
            server.uri(),
            &RetryConfig {
                max_attempts: 3,
                delay_ms: 1,
                request_timeout_secs: 5,
            },
        )
        .expect("engine");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut entry = QueueEntry::new(message("x"));
        entry.attempts = 4;

        deliver_entry(engine, Arc::from("h"), entry.clone(), tx).await;

        let event = rx.recv().await.expect("event");
        assert_eq!(
            event,
            DeliveryEvent::Delivered {
                id: entry.id,
                attempts: 6
            }
        );
    }
}
