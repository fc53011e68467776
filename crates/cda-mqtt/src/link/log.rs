//! Log-only link for dry runs

use super::{BrokerLink, BrokerSender};
use crate::error::{MqttError, MqttResult};
use crate::types::QueuedMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Link that always connects and never drops
#[derive(Default)]
pub struct LogLink {
    sender: Arc<LogSender>,
}

impl LogLink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrokerLink for LogLink {
    fn name(&self) -> &str {
        "log"
    }

    fn sender(&self) -> Arc<dyn BrokerSender> {
        self.sender.clone()
    }

    async fn connect(&mut self) -> MqttResult<()> {
        info!("Dry run: pretending to connect, messages will only be logged");
        Ok(())
    }

    async fn monitor(&mut self) -> MqttError {
        std::future::pending().await
    }

    async fn disconnect(&mut self) {
        info!(
            "Dry run: disconnecting after {} messages",
            self.sender.sent()
        );
    }
}

/// Logs each message instead of sending it
#[derive(Default)]
pub struct LogSender {
    sent: AtomicU64,
}

impl LogSender {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerSender for LogSender {
    async fn send(&self, message: &QueuedMessage) -> MqttResult<()> {
        let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "[{}] {} ({} bytes, qos {})",
            count,
            message.topic,
            message.payload.len(),
            message.qos.level()
        );
        debug!("{}", String::from_utf8_lossy(&message.payload));
        Ok(())
    }
}
