//! MQTT 3.1.1 link over rumqttc

use super::{BrokerLink, BrokerSender};
use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::types::QueuedMessage;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimum requests buffered between the client handle and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// How long a publish may wait for room in the request channel
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the DISCONNECT packet to go out
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Link to a real broker
pub struct MqttLink {
    sender: Arc<MqttSender>,
    eventloop: EventLoop,
    endpoint: String,
}

impl MqttLink {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        // Room for a full offline queue so a drain is never throttled by the channel alone
        let capacity = config.queue_capacity.max(REQUEST_CHANNEL_CAPACITY);
        let (client, eventloop) = AsyncClient::new(options, capacity);
        Self {
            sender: Arc::new(MqttSender { client }),
            eventloop,
            endpoint: format!("{}:{}", config.host, config.port),
        }
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn sender(&self) -> Arc<dyn BrokerSender> {
        self.sender.clone()
    }

    async fn connect(&mut self) -> MqttResult<()> {
        // Polling a fresh or failed event loop opens a new connection
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        debug!("CONNACK from {}", self.endpoint);
                        Ok(())
                    } else {
                        Err(MqttError::connect(format!("{:?}", ack.code)))
                    };
                }
                Ok(event) => debug!("Event before CONNACK: {:?}", event),
                Err(e) => return Err(MqttError::connect(e)),
            }
        }
    }

    async fn monitor(&mut self) -> MqttError {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return MqttError::ConnectionClosed;
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    debug!("PUBACK {}", ack.pkid);
                }
                Ok(_) => {}
                Err(e) => return MqttError::ConnectionLost(e.to_string()),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.sender.client.try_disconnect() {
            warn!("Failed to request disconnect: {}", e);
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Broker did not acknowledge disconnect in time");
        } else {
            info!("Disconnected from {}", self.endpoint);
        }
    }
}

/// Publishing half of [`MqttLink`]
pub struct MqttSender {
    client: AsyncClient,
}

#[async_trait]
impl BrokerSender for MqttSender {
    async fn send(&self, message: &QueuedMessage) -> MqttResult<()> {
        // Waits while the event loop catches up; it only runs while a session is up
        let publish = self.client.publish(
            message.topic.clone(),
            message.qos.into(),
            false,
            message.payload.clone(),
        );
        match tokio::time::timeout(SEND_TIMEOUT, publish).await {
            Ok(result) => result.map_err(MqttError::send),
            Err(_) => Err(MqttError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, ConnectionStats};
    use crate::publisher::Publisher;
    use cda_core::config::BrokerSettings;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;

    /// Accepts one client, answers CONNECT with CONNACK and swallows the rest
    async fn local_broker() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            socket.read(&mut buf).await.unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        });
        port
    }

    struct Running {
        publisher: Arc<Publisher>,
        manager: Option<ConnectionManager>,
        link: Option<MqttLink>,
        shutdown: broadcast::Sender<()>,
    }

    impl Running {
        async fn new(queue_capacity: usize) -> Self {
            let settings = BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: local_broker().await,
                tls: false,
                queue_capacity,
                ..Default::default()
            };
            let config = MqttConfig::from_settings(&settings, "CDA_02").unwrap();
            let link = MqttLink::new(&config);
            let manager = ConnectionManager::new(config.backoff(), config.connect_timeout);
            let publisher = Arc::new(Publisher::new(link.sender(), manager.handle(), &config));
            let (shutdown, _) = broadcast::channel(1);
            Self {
                publisher,
                manager: Some(manager),
                link: Some(link),
                shutdown,
            }
        }

        async fn start(&mut self) -> JoinHandle<ConnectionStats> {
            let manager = self.manager.take().unwrap();
            let link = self.link.take().unwrap();
            let mut states = manager.subscribe();
            self.publisher.start_drain_worker(self.shutdown.subscribe());
            let connection = manager.start(Box::new(link), self.shutdown.subscribe());
            states.wait_for(|s| s.is_connected()).await.unwrap();
            connection
        }

        async fn publish(&self, count: usize) {
            for n in 0..count {
                self.publisher.publish_payload(n.to_string().into_bytes()).await;
            }
        }

        async fn stop(self, connection: JoinHandle<ConnectionStats>) -> ConnectionStats {
            self.shutdown.send(()).unwrap();
            connection.await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_link_builds_from_config() {
        let settings = BrokerSettings {
            host: "broker.local".to_string(),
            port: 1883,
            tls: false,
            ..Default::default()
        };
        let config = MqttConfig::from_settings(&settings, "CDA_02").unwrap();
        let link = MqttLink::new(&config);
        assert_eq!(link.name(), "broker.local:1883");
    }

    #[tokio::test]
    async fn test_drains_more_than_request_channel_minimum() {
        let mut running = Running::new(100).await;
        running.publish(60).await;
        assert_eq!(running.publisher.pending(), 60);

        let connection = running.start().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while running.publisher.stats().drained < 60 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(running.publisher.pending(), 0);

        let stats = running.stop(connection).await;
        assert_eq!(stats.connect_attempts, 1);
        assert_eq!(stats.disconnects, 0);
    }

    #[tokio::test]
    async fn test_full_request_channel_applies_backpressure() {
        // Capacity 10 leaves the request channel at its 16 slot minimum
        let mut running = Running::new(10).await;
        let connection = running.start().await;

        running.publish(40).await;
        let publisher_stats = running.publisher.stats();
        assert_eq!(publisher_stats.published_direct, 40);
        assert_eq!(publisher_stats.queued, 0);

        let stats = running.stop(connection).await;
        assert_eq!(stats.disconnects, 0);
    }
}
