//! Error types for the connection manager.

use std::time::Duration;

use thiserror::Error;

/// Error raised by the underlying broker transport.
///
/// Transport implementations reduce their client-library errors to this
/// type so the manager never depends on a particular AMQP crate.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from `connect()`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(#[source] TransportError),

    #[error("failed to declare queue '{queue}': {source}")]
    QueueDeclareFailed {
        queue: String,
        #[source]
        source: TransportError,
    },

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("manager is shut down")]
    ShutDown,
}

/// Errors from `publish()`.
///
/// Never retried internally; callers own their retry/backpressure policy.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("channel not initialized")]
    ChannelNotInitialized,

    #[error("failed to serialize message payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to declare queue '{queue}': {source}")]
    QueueDeclareFailed {
        queue: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to publish to queue '{queue}': {source}")]
    SendFailed {
        queue: String,
        #[source]
        source: TransportError,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Result type alias for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Result type alias for publish operations.
pub type PublishResult<T> = std::result::Result<T, PublishError>;
