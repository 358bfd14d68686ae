//! Error types shared by the agent's collaborators.

use thiserror::Error;

/// Failures talking to the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Broker could not be reached or refused the session.
    #[error("connection failed: {0}")]
    Connection(String),

    /// No `ConnAck` arrived in time.
    #[error("timed out waiting for broker acknowledgement")]
    Timeout,

    /// A publish could not be handed to the transport.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Failures reading sensors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sensor read failed: {0}")]
    Read(String),

    #[error("malformed query for '{metric}': {reason}")]
    Query { metric: String, reason: String },
}

/// Invalid environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid MQTT address '{0}'")]
    InvalidAddress(String),
}

impl From<rumqttc::ConnectionError> for BusError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        BusError::Connection(err.to_string())
    }
}

impl From<rumqttc::ClientError> for BusError {
    fn from(err: rumqttc::ClientError) -> Self {
        BusError::Publish(err.to_string())
    }
}
