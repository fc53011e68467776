//! CDA MQTT - Broker delivery for the CDA telemetry agent
//!
//! This crate takes assembled messages from the cycle driver and gets them
//! to the broker:
//!
//! - **Publisher** - direct send when connected, offline queue otherwise
//! - **Offline Queue** - bounded FIFO that keeps the most recent messages
//! - **Connection Manager** - connect, backoff, reconnect, drain requests
//! - **Links** - MQTT over rumqttc, or a log-only link for dry runs
//!
//! ## Wiring
//!
//! ```no_run
//! use cda_core::config::BrokerSettings;
//! use cda_mqtt::{BrokerLink, ConnectionManager, MqttConfig, MqttLink, Publisher};
//! use std::sync::Arc;
//!
//! # async fn wire() -> Result<(), cda_mqtt::MqttError> {
//! let config = MqttConfig::from_settings(&BrokerSettings::default(), "CDA_02")?;
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
//!
//! let link = MqttLink::new(&config);
//! let manager = ConnectionManager::new(config.backoff(), config.connect_timeout);
//! let publisher = Arc::new(Publisher::new(link.sender(), manager.handle(), &config));
//!
//! publisher.start_drain_worker(shutdown_tx.subscribe());
//! let connection = manager.start(Box::new(link), shutdown_tx.subscribe());
//! # let _ = connection;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod link;
pub mod offline_queue;
pub mod publisher;
pub mod types;

// Re-exports for convenience
pub use backoff::Backoff;
pub use config::MqttConfig;
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionStats};
pub use error::{MqttError, MqttResult};
pub use link::{BrokerLink, BrokerSender, LogLink, LogSender, MqttLink, MqttSender};
pub use offline_queue::{OfflineQueue, QueueStats};
pub use publisher::{Publisher, PublisherStats};
pub use types::{ConnectionState, QualityOfService, QueuedMessage};
