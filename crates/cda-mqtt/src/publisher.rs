//! Publisher - sends messages directly when connected, queues otherwise
//!
//! Publishing never waits for a reconnect: one send attempt when the
//! connection is up, otherwise straight into the offline queue. Queued
//! messages go out oldest-first when the connection manager requests a
//! drain.

use crate::config::MqttConfig;
use crate::connection::ConnectionHandle;
use crate::link::BrokerSender;
use crate::offline_queue::{OfflineQueue, QueueStats};
use crate::types::{QualityOfService, QueuedMessage};
use async_trait::async_trait;
use cda_core::{Message, MessageSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Publisher statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Messages sent on the first attempt
    pub published_direct: u64,

    /// Messages that went into the offline queue
    pub queued: u64,

    /// Queued messages later delivered by a drain
    pub drained: u64,

    /// Messages lost to queue eviction or serialization failure
    pub dropped: u64,
}

pub struct Publisher {
    sender: Arc<dyn BrokerSender>,
    connection: ConnectionHandle,
    queue: OfflineQueue,
    topic: String,
    qos: QualityOfService,
    drain_lock: tokio::sync::Mutex<()>,
    drain_worker: Mutex<Option<JoinHandle<()>>>,

    // Stats
    published_direct: AtomicU64,
    queued: AtomicU64,
    drained: AtomicU64,
    dropped: AtomicU64,
}

impl Publisher {
    pub fn new(
        sender: Arc<dyn BrokerSender>,
        connection: ConnectionHandle,
        config: &MqttConfig,
    ) -> Self {
        Self {
            sender,
            connection,
            queue: OfflineQueue::new(config.queue_capacity),
            topic: config.topic.clone(),
            qos: config.qos,
            drain_lock: tokio::sync::Mutex::new(()),
            drain_worker: Mutex::new(None),
            published_direct: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize and publish one assembled message
    pub async fn publish_message(&self, message: &Message) {
        match serde_json::to_vec(message) {
            Ok(payload) => self.publish_payload(payload).await,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Publish an already serialized payload on the device topic
    pub async fn publish_payload(&self, payload: Vec<u8>) {
        let message = QueuedMessage::new(self.topic.as_str(), payload, self.qos);

        if self.connection.is_connected() {
            match self.sender.send(&message).await {
                Ok(()) => {
                    self.published_direct.fetch_add(1, Ordering::Relaxed);
                    debug!("Published {} bytes to {}", message.payload.len(), self.topic);
                    return;
                }
                Err(e) => {
                    warn!("Publish failed, queueing message: {}", e);
                    if e.is_network_error() {
                        self.connection.report_lost(e);
                    }
                    self.enqueue(message);
                    return;
                }
            }
        }

        debug!("Not connected ({}), queueing message", self.connection.state());
        self.queue_offline(message);
    }

    /// Queue a message published while disconnected
    ///
    /// The connection may have come up, and drained an empty queue, since
    /// the caller last looked; in that case ask for another drain.
    fn queue_offline(&self, message: QueuedMessage) {
        self.enqueue(message);
        if self.connection.is_connected() {
            debug!("Connected while queueing, requesting drain");
            self.connection.request_drain();
        }
    }

    fn enqueue(&self, message: QueuedMessage) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if self.queue.push(message).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Send queued messages oldest-first while the connection stays up
    ///
    /// Stops at the first failed send; the failed message goes back to the
    /// head of the queue so the rest keep their order. Returns how many
    /// messages were delivered.
    pub async fn drain(&self) -> usize {
        let _guard = self.drain_lock.lock().await;
        let pending = self.queue.len();
        if pending == 0 {
            return 0;
        }
        info!("Draining offline queue: {} messages pending", pending);

        let mut sent = 0;
        while self.connection.is_connected() {
            let Some(message) = self.queue.pop_front() else {
                break;
            };

            match self.sender.send(&message).await {
                Ok(()) => {
                    sent += 1;
                    self.drained.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Send failed while draining, will retry on reconnect: {}", e);
                    if !self.queue.requeue_front(message) {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    if e.is_network_error() {
                        self.connection.report_lost(e);
                    }
                    break;
                }
            }
        }

        if sent > 0 {
            info!(
                "Drained {} messages from offline queue ({} left)",
                sent,
                self.queue.len()
            );
        }
        sent
    }

    /// Spawn the task that drains the queue whenever the connection comes up
    pub fn start_drain_worker(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let publisher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = publisher.connection.drain_requested() => {
                        publisher.drain().await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Drain worker stopped");
        });

        if let Some(previous) = self.drain_worker.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the drain worker and give up on whatever is still queued
    ///
    /// Returns the number of messages lost.
    pub fn shutdown(&self) -> usize {
        if let Some(worker) = self.drain_worker.lock().take() {
            worker.abort();
        }

        let lost = self.queue.clear();
        if lost > 0 {
            warn!("Shutting down with {} unsent messages, they are lost", lost);
        }
        lost
    }

    /// Messages waiting in the offline queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published_direct: self.published_direct.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MessageSink for Publisher {
    async fn publish(&self, message: Message) {
        self.publish_message(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::connection::ConnectionManager;
    use crate::link::testing::{FakeLink, FakeSender, Outcome};
    use crate::link::BrokerLink;
    use crate::types::ConnectionState;
    use cda_core::config::BrokerSettings;
    use cda_core::PayloadAssembler;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn config(capacity: usize) -> MqttConfig {
        let settings = BrokerSettings {
            queue_capacity: capacity,
            ..Default::default()
        };
        MqttConfig::from_settings(&settings, "CDA_02").unwrap()
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            Backoff::new(Duration::from_secs(1), Duration::from_secs(120)),
            Duration::from_secs(10),
        )
    }

    fn setup(capacity: usize) -> (ConnectionManager, Arc<FakeSender>, Publisher) {
        let manager = manager();
        let sender = Arc::new(FakeSender::default());
        let publisher = Publisher::new(sender.clone(), manager.handle(), &config(capacity));
        (manager, sender, publisher)
    }

    async fn publish_numbered(publisher: &Publisher, range: std::ops::Range<usize>) {
        for n in range {
            publisher.publish_payload(n.to_string().into_bytes()).await;
        }
    }

    fn queued_bodies(publisher: &Publisher) -> Vec<String> {
        publisher
            .queue
            .peek(usize::MAX)
            .iter()
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    fn numbers(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_direct_send_when_connected() {
        let (manager, sender, publisher) = setup(100);
        manager.set_state(ConnectionState::Connected);

        let message = PayloadAssembler::new("CDA_02", "living_room", 95).assemble(&BTreeMap::new());
        publisher.publish(message).await;

        assert_eq!(publisher.pending(), 0);
        assert_eq!(publisher.stats().published_direct, 1);
        let sent = sender.sent.lock();
        assert_eq!(sent[0].topic, "SensorData/CDA_02");
        let json: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(json["device_id"], "CDA_02");
    }

    #[tokio::test]
    async fn test_queues_while_disconnected() {
        for state in [ConnectionState::Disconnected, ConnectionState::Connecting] {
            let (manager, sender, publisher) = setup(100);
            manager.set_state(state);

            publish_numbered(&publisher, 0..3).await;
            assert!(sender.sent.lock().is_empty());
            assert_eq!(publisher.pending(), 3);
        }
    }

    #[tokio::test]
    async fn test_send_failure_queues_and_reports() {
        let (manager, sender, publisher) = setup(100);
        manager.set_state(ConnectionState::Connected);
        sender.fail_after(Some(0));

        publish_numbered(&publisher, 0..1).await;

        assert_eq!(publisher.pending(), 1);
        assert_eq!(sender.failures.load(Ordering::SeqCst), 1);
        let stats = publisher.stats();
        assert_eq!(stats.published_direct, 0);
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn test_outage_keeps_last_capacity_messages() {
        let (_manager, _sender, publisher) = setup(100);

        publish_numbered(&publisher, 0..150).await;

        assert_eq!(publisher.pending(), 100);
        assert_eq!(queued_bodies(&publisher), numbers(50..150));
        let stats = publisher.stats();
        assert_eq!(stats.queued, 150);
        assert_eq!(stats.dropped, 50);
    }

    #[tokio::test]
    async fn test_drain_empty_queue_is_noop() {
        let (manager, sender, publisher) = setup(100);
        manager.set_state(ConnectionState::Connected);

        assert_eq!(publisher.drain().await, 0);
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drain_requires_connection() {
        let (_manager, sender, publisher) = setup(100);
        publish_numbered(&publisher, 0..3).await;

        assert_eq!(publisher.drain().await, 0);
        assert!(sender.sent.lock().is_empty());
        assert_eq!(publisher.pending(), 3);
    }

    #[tokio::test]
    async fn test_failure_mid_drain_keeps_order() {
        let (manager, sender, publisher) = setup(100);
        publish_numbered(&publisher, 0..5).await;

        manager.set_state(ConnectionState::Connected);
        sender.fail_after(Some(2));
        assert_eq!(publisher.drain().await, 2);

        assert_eq!(sender.bodies(), numbers(0..2));
        assert_eq!(queued_bodies(&publisher), numbers(2..5));

        sender.fail_after(None);
        assert_eq!(publisher.drain().await, 3);
        assert_eq!(sender.bodies(), numbers(0..5));
        assert_eq!(publisher.stats().drained, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_drains_in_order() {
        let manager = manager();
        let link = FakeLink::new(vec![Outcome::Refuse]);
        let publisher = Arc::new(Publisher::new(link.sender(), manager.handle(), &config(100)));
        let mut states = manager.subscribe();
        let (_tx, shutdown) = broadcast::channel(1);

        publish_numbered(&publisher, 0..5).await;
        assert_eq!(publisher.pending(), 5);

        publisher.start_drain_worker(shutdown.resubscribe());
        manager.start(Box::new(link.clone()), shutdown);
        states.wait_for(|s| s.is_connected()).await.unwrap();

        while publisher.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(link.sender.bodies(), numbers(0..5));
        assert_eq!(publisher.stats().drained, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_queued_as_connection_comes_up_is_delivered() {
        let (manager, sender, publisher) = setup(100);
        let publisher = Arc::new(publisher);
        let (_tx, shutdown) = broadcast::channel(1);
        publisher.start_drain_worker(shutdown);

        // The connection comes up and its drain finds nothing to send
        manager.set_state(ConnectionState::Connected);
        manager.handle().request_drain();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(publisher.stats().drained, 0);

        // A publish that saw the old state queues its message afterwards
        let message = QueuedMessage::new(
            publisher.topic(),
            b"late".to_vec(),
            QualityOfService::AtLeastOnce,
        );
        publisher.queue_offline(message);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sender.bodies(), vec!["late".to_string()]);
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_discards_queue() {
        let (_manager, _sender, publisher) = setup(100);
        publish_numbered(&publisher, 0..4).await;

        assert_eq!(publisher.shutdown(), 4);
        assert_eq!(publisher.pending(), 0);
    }
}
