//! Domain error types.

use event_store::StoreError;
use thiserror::Error;

use crate::cart::ValidationError;
use crate::registry::DecodeError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] StoreError),

    /// The command was rejected by the aggregate.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A stored record could not be turned back into an event.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Another writer appended to the aggregate since it was loaded.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }

    /// The failure is transient and the command can be tried again as is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_retryable() || e.is_conflict())
    }
}
