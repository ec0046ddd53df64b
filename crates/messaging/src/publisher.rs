//! Cart event publisher.

use std::sync::Arc;

use domain::{CartEvent, DomainEvent, Recorded};
use tokio::sync::OnceCell;

use crate::broker::{Broker, OutboundMessage, StreamConfig};
use crate::error::PublishError;
use crate::{DEFAULT_STREAM, DEFAULT_SUBJECT, EVENT_KIND_HEADER, MESSAGE_ID_HEADER};

/// Publishes cart events to one well-known subject.
///
/// The body is the JSON of the event's fields and the `event_kind` header
/// names its kind. Delivery is at-least-once: consumers must tolerate
/// duplicates. The stream is provisioned on the first publish.
pub struct Publisher<B: Broker> {
    broker: B,
    stream: StreamConfig,
    subject: String,
    provisioned: Arc<OnceCell<()>>,
}

impl<B: Broker + Clone> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            stream: self.stream.clone(),
            subject: self.subject.clone(),
            provisioned: self.provisioned.clone(),
        }
    }
}

impl<B: Broker> Publisher<B> {
    /// Creates a publisher for the default `cart` stream and `cart.events`
    /// subject.
    pub fn new(broker: B) -> Self {
        Self::with_stream(broker, DEFAULT_STREAM, DEFAULT_SUBJECT)
    }

    pub fn with_stream(broker: B, stream: impl Into<String>, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            broker,
            stream: StreamConfig::new(stream, subject.clone()),
            subject,
            provisioned: Arc::new(OnceCell::new()),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Publishes an event.
    pub async fn publish(&self, event: &CartEvent) -> Result<(), PublishError> {
        self.send_event(event, None).await
    }

    /// Publishes an event with a de-duplication id the broker and consumers
    /// can use to drop repeats.
    pub async fn publish_with_id(
        &self,
        event: &CartEvent,
        message_id: &str,
    ) -> Result<(), PublishError> {
        self.send_event(event, Some(message_id)).await
    }

    /// Publishes a persisted event under its log identity.
    pub async fn publish_recorded(&self, recorded: &Recorded<CartEvent>) -> Result<(), PublishError> {
        self.publish_with_id(&recorded.event, &recorded.record.message_id())
            .await
    }

    /// Publishes an already encoded body under `kind` without decoding it.
    ///
    /// Used to forward stored records, including kinds this build does not
    /// know.
    pub async fn publish_raw(
        &self,
        kind: &str,
        payload: Vec<u8>,
        message_id: &str,
    ) -> Result<(), PublishError> {
        self.send(kind, Ok(payload), Some(message_id)).await
    }

    async fn send_event(&self, event: &CartEvent, message_id: Option<&str>) -> Result<(), PublishError> {
        let payload = if event.cart_id().is_blank() || event.item_id().trim().is_empty() {
            Err(PublishError::EmptyEvent)
        } else {
            event.encode().map_err(PublishError::from)
        };
        self.send(event.event_kind(), payload, message_id).await
    }

    #[tracing::instrument(skip(self, payload))]
    async fn send(
        &self,
        kind: &str,
        payload: Result<Vec<u8>, PublishError>,
        message_id: Option<&str>,
    ) -> Result<(), PublishError> {
        let result = match payload {
            Ok(payload) => self.try_send(kind, payload, message_id).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => {
                metrics::counter!("cart_events_published_total", "kind" => kind.to_string())
                    .increment(1);
                tracing::debug!("Published event");
            }
            Err(e) => {
                metrics::counter!("cart_publish_failures_total", "kind" => kind.to_string())
                    .increment(1);
                tracing::warn!(error = %e, "Failed to publish event");
            }
        }
        result
    }

    async fn try_send(
        &self,
        kind: &str,
        payload: Vec<u8>,
        message_id: Option<&str>,
    ) -> Result<(), PublishError> {
        if kind.trim().is_empty() {
            return Err(PublishError::EmptyEvent);
        }
        if payload.is_empty() || payload == b"{}" {
            return Err(PublishError::EmptyPayload {
                kind: kind.to_string(),
            });
        }

        self.provisioned
            .get_or_try_init(|| self.broker.ensure_stream(&self.stream))
            .await
            .map_err(PublishError::StreamSetup)?;

        let mut message =
            OutboundMessage::new(self.subject.clone(), payload).with_header(EVENT_KIND_HEADER, kind);
        if let Some(id) = message_id {
            message = message.with_header(MESSAGE_ID_HEADER, id);
        }

        self.broker
            .publish(message)
            .await
            .map_err(PublishError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use common::AggregateId;

    fn event() -> CartEvent {
        CartEvent::item_added(AggregateId::new("cart-123"), "item-001", 2)
    }

    #[tokio::test]
    async fn publish_sets_kind_header_and_json_body() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());

        publisher.publish(&event()).await.unwrap();

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, "cart.events");
        assert_eq!(published[0].header(EVENT_KIND_HEADER), Some("ItemAdded"));
        assert_eq!(published[0].header(MESSAGE_ID_HEADER), None);

        let body: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["cart_id"], "cart-123");
        assert_eq!(body["item_id"], "item-001");
        assert_eq!(body["quantity"], 2);
    }

    #[tokio::test]
    async fn first_publish_provisions_the_stream() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());
        assert!(!broker.has_stream("cart").await);

        publisher.publish(&event()).await.unwrap();
        publisher.publish(&event()).await.unwrap();

        assert!(broker.has_stream("cart").await);
        assert_eq!(broker.published().await.len(), 2);
    }

    #[tokio::test]
    async fn publish_with_id_sets_dedup_header() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());

        publisher
            .publish_with_id(&event(), "cart-123:1")
            .await
            .unwrap();

        let published = broker.published().await;
        assert_eq!(published[0].header(MESSAGE_ID_HEADER), Some("cart-123:1"));
    }

    #[tokio::test]
    async fn empty_event_is_rejected() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());

        let blank_cart = CartEvent::item_added(AggregateId::new(""), "item-001", 1);
        let blank_item = CartEvent::item_removed(AggregateId::new("cart-1"), " ", 1);

        assert!(matches!(
            publisher.publish(&blank_cart).await,
            Err(PublishError::EmptyEvent)
        ));
        assert!(matches!(
            publisher.publish(&blank_item).await,
            Err(PublishError::EmptyEvent)
        ));
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());
        broker.fail_publishes(true).await;

        let result = publisher.publish(&event()).await;

        assert!(matches!(result, Err(PublishError::Transport(_))));
    }

    #[tokio::test]
    async fn publish_raw_forwards_stored_bytes() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());
        let body = br#"{"cart_id":"cart-9","total":12}"#.to_vec();

        publisher
            .publish_raw("CartCheckedOut", body.clone(), "cart-9:4")
            .await
            .unwrap();

        let published = broker.published().await;
        assert_eq!(published[0].header(EVENT_KIND_HEADER), Some("CartCheckedOut"));
        assert_eq!(published[0].header(MESSAGE_ID_HEADER), Some("cart-9:4"));
        assert_eq!(published[0].payload, body);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.clone());

        for body in [Vec::new(), b"{}".to_vec()] {
            let result = publisher.publish_raw("ItemAdded", body, "cart-1:1").await;
            assert!(matches!(
                result,
                Err(PublishError::EmptyPayload { ref kind }) if kind == "ItemAdded"
            ));
        }
        assert!(matches!(
            publisher.publish_raw(" ", b"{\"a\":1}".to_vec(), "cart-1:1").await,
            Err(PublishError::EmptyEvent)
        ));
        assert!(broker.published().await.is_empty());
    }
}
