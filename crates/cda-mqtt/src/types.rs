//! Shared types for the broker connection

use crate::error::MqttError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    pub fn level(&self) -> u8 {
        match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QualityOfService {
    type Error = MqttError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QualityOfService::AtMostOnce),
            1 => Ok(QualityOfService::AtLeastOnce),
            2 => Ok(QualityOfService::ExactlyOnce),
            other => Err(MqttError::Config(format!("invalid QoS level {}", other))),
        }
    }
}

impl From<QualityOfService> for rumqttc::QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QualityOfService::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QualityOfService::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// A serialized message waiting to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QualityOfService,
    /// When the message was handed to the publisher
    pub created_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, qos: QualityOfService) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            created_at: Utc::now(),
        }
    }
}

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        for level in 0..=2u8 {
            let qos = QualityOfService::try_from(level).unwrap();
            assert_eq!(qos.level(), level);
        }
        assert!(QualityOfService::try_from(3).is_err());
        assert_eq!(
            rumqttc::QoS::from(QualityOfService::AtLeastOnce),
            rumqttc::QoS::AtLeastOnce
        );
    }

    #[test]
    fn test_connection_state_default() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(!state.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
