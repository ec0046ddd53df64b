//! Messaging error types.

use thiserror::Error;

/// Errors raised by a broker transport.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connection(String),

    #[error("Failed to set up stream {stream}: {reason}")]
    Stream { stream: String, reason: String },

    #[error("No stream accepts subject {0}")]
    NoStream(String),

    #[error("Failed to publish message: {0}")]
    Publish(String),

    #[error("Failed to subscribe: {0}")]
    Subscribe(String),

    #[error("Failed to acknowledge message: {0}")]
    Ack(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors returned by [`crate::Publisher`].
///
/// The event is already durable when any of these is returned; the outbox
/// relay republishes it later.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The event has no cart id, item id or kind.
    #[error("Refusing to publish empty event")]
    EmptyEvent,

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Serialization produced an empty body.
    #[error("Serialized {kind} event is empty")]
    EmptyPayload { kind: String },

    #[error("Stream setup failed: {0}")]
    StreamSetup(#[source] BrokerError),

    #[error("Transport error: {0}")]
    Transport(#[source] BrokerError),
}

/// Failure reported by an event handler. The message is negatively
/// acknowledged and redelivered by the broker.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}
