//! NATS JetStream implementation of the Broker trait.

use async_nats::Client;
use async_nats::HeaderMap;
use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, pull},
    stream,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::broker::{
    Acknowledger, Broker, Delivery, Headers, OutboundMessage, StreamConfig, SubscriptionConfig,
};
use crate::error::{BrokerError, BrokerResult};

/// Broker backed by NATS JetStream.
///
/// Streams use file storage with no limits. Consumers are durable pull
/// consumers with explicit acknowledgement, named after the consumer group so
/// every instance of a service shares one cursor.
#[derive(Clone)]
pub struct JetStreamBroker {
    context: jetstream::Context,
}

impl JetStreamBroker {
    /// Wraps an already-connected client.
    pub fn new(client: Client) -> Self {
        Self {
            context: jetstream::new(client),
        }
    }

    /// Connects to the NATS server at `url`.
    pub async fn connect(url: &str) -> BrokerResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Broker for JetStreamBroker {
    async fn ensure_stream(&self, config: &StreamConfig) -> BrokerResult<()> {
        if self.context.get_stream(&config.name).await.is_ok() {
            return Ok(());
        }

        let stream_config = stream::Config {
            name: config.name.clone(),
            subjects: config.subjects.clone(),
            storage: stream::StorageType::File,
            ..Default::default()
        };

        if let Err(e) = self.context.create_stream(stream_config).await {
            // Another instance may have created it between the two calls
            if self.context.get_stream(&config.name).await.is_ok() {
                tracing::debug!(stream = %config.name, error = %e, "Stream already exists");
                return Ok(());
            }
            return Err(BrokerError::Stream {
                stream: config.name.clone(),
                reason: e.to_string(),
            });
        }

        tracing::info!(stream = %config.name, "Created stream");
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> BrokerResult<()> {
        let mut headers = HeaderMap::new();
        for (name, value) in &message.headers {
            headers.insert(name.as_str(), value.as_str());
        }

        let ack = self
            .context
            .publish_with_headers(message.subject, headers, message.payload.into())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        // Wait for the stream to store it
        ack.await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        config: &SubscriptionConfig,
    ) -> BrokerResult<BoxStream<'static, BrokerResult<Delivery>>> {
        let stream = self
            .context
            .get_stream(&config.stream)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let consumer: jetstream::consumer::Consumer<pull::Config> = stream
            .get_or_create_consumer(
                &config.group,
                pull::Config {
                    durable_name: Some(config.group.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let deliveries = messages.map(|result| {
            result
                .map(into_delivery)
                .map_err(|e| BrokerError::Subscribe(e.to_string()))
        });

        Ok(deliveries.boxed())
    }
}

fn into_delivery(message: jetstream::Message) -> Delivery {
    let mut headers = Headers::new();
    if let Some(nats_headers) = &message.headers {
        for (key, values) in nats_headers.iter() {
            // Take the first value for each header
            if let Some(value) = values.first() {
                headers.insert(key.to_string(), value.to_string());
            }
        }
    }

    let attempt = message
        .info()
        .map(|info| info.delivered.max(1) as u64)
        .unwrap_or(1);
    let subject = message.subject.to_string();
    let payload = message.payload.to_vec();

    Delivery::new(
        subject,
        headers,
        payload,
        attempt,
        Box::new(JetStreamAcker { message }),
    )
}

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn nak(self: Box<Self>) -> BrokerResult<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EVENT_KIND_HEADER, MESSAGE_ID_HEADER};
    use std::time::Duration;

    // These tests require a running NATS server with JetStream enabled:
    // docker run -p 4222:4222 nats:2.10-alpine -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn publish_and_consume_round_trip() {
        let broker = JetStreamBroker::connect("nats://localhost:4222")
            .await
            .expect("NATS server must be running on localhost:4222");

        let stream = StreamConfig::new("cart_test", "cart_test.events");
        broker.ensure_stream(&stream).await.unwrap();
        // Second call finds the existing stream
        broker.ensure_stream(&stream).await.unwrap();

        broker
            .publish(
                OutboundMessage::new("cart_test.events", br#"{"quantity":2}"#.to_vec())
                    .with_header(EVENT_KIND_HEADER, "ItemAdded")
                    .with_header(MESSAGE_ID_HEADER, "cart-test:1"),
            )
            .await
            .unwrap();

        let mut deliveries = broker
            .subscribe(&SubscriptionConfig {
                stream: "cart_test".to_string(),
                subject: "cart_test.events".to_string(),
                group: "cart_test_group".to_string(),
            })
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), deliveries.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .unwrap();

        assert_eq!(delivery.header(EVENT_KIND_HEADER), Some("ItemAdded"));
        assert_eq!(delivery.payload, br#"{"quantity":2}"#.to_vec());
        delivery.ack().await.unwrap();
    }
}
