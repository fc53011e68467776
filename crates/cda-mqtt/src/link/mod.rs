//! Broker transport seam
//!
//! A link is split in two: the [`BrokerLink`] half is owned by the
//! connection manager's task and drives the session, while the
//! [`BrokerSender`] half is shared with the publisher for sending.

mod log;
mod mqtt;

pub use self::log::{LogLink, LogSender};
pub use self::mqtt::{MqttLink, MqttSender};

use crate::error::{MqttError, MqttResult};
use crate::types::QueuedMessage;
use async_trait::async_trait;
use std::sync::Arc;

/// Publishing half of a broker link
#[async_trait]
pub trait BrokerSender: Send + Sync {
    /// Hand one message to the transport
    ///
    /// A single attempt; never retries.
    async fn send(&self, message: &QueuedMessage) -> MqttResult<()>;
}

/// Session half of a broker link
#[async_trait]
pub trait BrokerLink: Send {
    /// Name for logs
    fn name(&self) -> &str;

    /// Sender bound to this link's session
    fn sender(&self) -> Arc<dyn BrokerSender>;

    /// Establish the session (handshake and authentication)
    async fn connect(&mut self) -> MqttResult<()>;

    /// Service the established session until it fails
    ///
    /// Must be cancel safe; returns the reason the session ended.
    async fn monitor(&mut self) -> MqttError;

    /// Close the session cleanly
    async fn disconnect(&mut self);
}
