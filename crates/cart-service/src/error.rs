//! Error types for the cart service, the outbox relay and the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ValidationError};
use event_store::{StoreError, Version};
use messaging::PublishError;
use thiserror::Error;

/// Errors returned by cart commands.
#[derive(Debug, Error)]
pub enum CartServiceError {
    /// The command was rejected, could not be persisted, or the history
    /// could not be replayed. Nothing was published.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The events are durable up to `version` but at least one did not reach
    /// the broker. The outbox relay publishes it later.
    #[error("Events stored at version {version} but not published: {source}")]
    Publish {
        version: Version,
        #[source]
        source: PublishError,
    },

    /// The events are durable up to `version` but were left to the outbox
    /// relay because an earlier record of the cart is still unpublished.
    #[error("Events stored at version {version}; publish left to the outbox relay")]
    Deferred { version: Version },
}

impl CartServiceError {
    /// Returns the validation failure, if the command was rejected as input.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            CartServiceError::Domain(DomainError::Validation(e)) => Some(e),
            _ => None,
        }
    }

    /// Another writer kept winning the version race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CartServiceError::Domain(e) if e.is_conflict())
    }

    /// The command's events are durable even though the call failed.
    pub fn is_stored(&self) -> bool {
        self.stored_version().is_some()
    }

    /// Version the cart reached when the command was stored but not published.
    pub fn stored_version(&self) -> Option<Version> {
        match self {
            CartServiceError::Publish { version, .. } | CartServiceError::Deferred { version } => {
                Some(*version)
            }
            CartServiceError::Domain(_) => None,
        }
    }
}

/// Errors raised by an outbox sweep.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Outbox store error: {0}")]
    Store(#[from] StoreError),

    #[error("Outbox record {message_id} not published: {source}")]
    Publish {
        message_id: String,
        #[source]
        source: PublishError,
    },
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Cart command failure.
    Service(CartServiceError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => service_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn service_error_to_response(err: CartServiceError) -> (StatusCode, String) {
    let status = match &err {
        CartServiceError::Domain(DomainError::Validation(v)) => match v {
            ValidationError::InsufficientQuantity { .. } => StatusCode::CONFLICT,
            ValidationError::NonPositiveQuantity { .. }
            | ValidationError::QuantityTooLarge { .. }
            | ValidationError::EmptyItemId => StatusCode::BAD_REQUEST,
        },
        CartServiceError::Domain(DomainError::EventStore(e)) if e.is_conflict() => {
            StatusCode::CONFLICT
        }
        CartServiceError::Domain(DomainError::EventStore(e)) if e.is_retryable() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CartServiceError::Publish { .. } | CartServiceError::Deferred { .. } => {
            StatusCode::ACCEPTED
        }
        CartServiceError::Domain(_) => {
            tracing::error!(error = %err, "cart command failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<CartServiceError> for ApiError {
    fn from(err: CartServiceError) -> Self {
        ApiError::Service(err)
    }
}
