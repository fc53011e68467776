//! Broker connection configuration
//!
//! Resolves the agent-level `BrokerSettings` into everything the link,
//! connection manager, and publisher need for one device.

use crate::backoff::Backoff;
use crate::error::{MqttError, MqttResult};
use crate::types::QualityOfService;
use cda_core::config::BrokerSettings;
use std::fmt;
use std::time::Duration;

/// Resolved connection settings for one device
#[derive(Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub qos: QualityOfService,

    /// Fixed publish topic, `{topic_prefix}/{device_id}`
    pub topic: String,

    pub queue_capacity: usize,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl MqttConfig {
    /// Build the config for `device_id` from broker settings
    pub fn from_settings(settings: &BrokerSettings, device_id: &str) -> MqttResult<Self> {
        if settings.host.is_empty() {
            return Err(MqttError::Config("broker host is empty".to_string()));
        }
        if settings.queue_capacity == 0 {
            return Err(MqttError::Config("queue_capacity must be at least 1".to_string()));
        }
        if settings.reconnect_min() > settings.reconnect_max() {
            return Err(MqttError::Config(format!(
                "reconnect_min_ms ({}) exceeds reconnect_max_ms ({})",
                settings.reconnect_min_ms, settings.reconnect_max_ms
            )));
        }

        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            client_id: settings
                .client_id
                .clone()
                .unwrap_or_else(|| format!("CDA_{}", device_id)),
            username: settings.username.clone(),
            password: settings.password.clone(),
            tls: settings.tls,
            keep_alive: settings.keep_alive(),
            connect_timeout: settings.connect_timeout(),
            qos: QualityOfService::try_from(settings.qos)?,
            topic: format!("{}/{}", settings.topic_prefix, device_id),
            queue_capacity: settings.queue_capacity,
            reconnect_min: settings.reconnect_min(),
            reconnect_max: settings.reconnect_max(),
        })
    }

    /// Reconnect backoff bounded by the configured delays
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_min, self.reconnect_max)
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls", &self.tls)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("qos", &self.qos)
            .field("topic", &self.topic)
            .field("queue_capacity", &self.queue_capacity)
            .field("reconnect_min", &self.reconnect_min)
            .field("reconnect_max", &self.reconnect_max)
            .finish()
    }
}
