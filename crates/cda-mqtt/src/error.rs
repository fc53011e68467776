//! Error types for cda-mqtt crate

use thiserror::Error;

/// Errors that can occur talking to the broker
#[derive(Debug, Error)]
pub enum MqttError {
    /// Transport rejected or failed a publish
    #[error("Send failed: {0}")]
    SendFailure(String),

    /// Handshake or authentication failed
    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    /// Established connection dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MqttError {
    /// Check if this is a network-related error
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            MqttError::SendFailure(_)
                | MqttError::ConnectionLost(_)
                | MqttError::ConnectionClosed
                | MqttError::Io(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MqttError::SendFailure(_)
                | MqttError::ConnectFailure(_)
                | MqttError::ConnectionLost(_)
                | MqttError::ConnectionClosed
                | MqttError::Timeout
                | MqttError::Io(_)
        )
    }

    pub fn send(msg: impl std::fmt::Display) -> Self {
        MqttError::SendFailure(msg.to_string())
    }

    pub fn connect(msg: impl std::fmt::Display) -> Self {
        MqttError::ConnectFailure(msg.to_string())
    }
}

/// Result type for broker operations
pub type MqttResult<T> = Result<T, MqttError>;
