//! Cart event subscriber.
//!
//! Each received message goes `Received -> Decoding -> Dispatching` and ends
//! acknowledged or negatively acknowledged:
//!
//! - no `event_kind` header, or a kind outside the registry: logged and
//!   acknowledged, no handler runs
//! - a known kind whose body does not decode: negatively acknowledged
//! - handler error: negatively acknowledged, the broker redelivers
//! - handler success: acknowledged

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{CartEvent, EventKind, ItemAdded, ItemRemoved, registry};
use futures::StreamExt;
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;

use crate::broker::{Broker, Delivery, StreamConfig, SubscriptionConfig};
use crate::error::{BrokerResult, HandlerError};
use crate::{
    DEFAULT_CONSUMER_GROUP, DEFAULT_STREAM, DEFAULT_SUBJECT, EVENT_KIND_HEADER, MESSAGE_ID_HEADER,
};

/// What the subscriber knows about the message being handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    /// Broker de-duplication id, when the publisher set one.
    pub message_id: Option<String>,
    pub subject: String,
    /// 1 on first delivery.
    pub attempt: u64,
}

/// Callbacks invoked for each decoded cart event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_item_added(
        &self,
        ctx: &MessageContext,
        event: &ItemAdded,
    ) -> Result<(), HandlerError>;

    async fn handle_item_removed(
        &self,
        ctx: &MessageContext,
        event: &ItemRemoved,
    ) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    async fn handle_item_added(
        &self,
        ctx: &MessageContext,
        event: &ItemAdded,
    ) -> Result<(), HandlerError> {
        (**self).handle_item_added(ctx, event).await
    }

    async fn handle_item_removed(
        &self,
        ctx: &MessageContext,
        event: &ItemRemoved,
    ) -> Result<(), HandlerError> {
        (**self).handle_item_removed(ctx, event).await
    }
}

/// How one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled and acknowledged.
    Acked,
    /// Handling failed; redelivery requested.
    Nacked,
    /// Unknown or missing kind; acknowledged without handling.
    Skipped,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Nacked => "nacked",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Consumes cart events as a member of a durable consumer group.
pub struct EventSubscriber<B: Broker, H: EventHandler> {
    broker: B,
    handler: Arc<H>,
    stream: StreamConfig,
    subscription: SubscriptionConfig,
}

impl<B: Broker, H: EventHandler> EventSubscriber<B, H> {
    /// Subscribes to `cart.events` on the `cart` stream as the
    /// `billing-service` group.
    pub fn new(broker: B, handler: H) -> Self {
        Self::with_config(
            broker,
            handler,
            StreamConfig::new(DEFAULT_STREAM, DEFAULT_SUBJECT),
            DEFAULT_CONSUMER_GROUP,
        )
    }

    pub fn with_config(
        broker: B,
        handler: H,
        stream: StreamConfig,
        group: impl Into<String>,
    ) -> Self {
        let subject = stream
            .subjects
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let subscription = SubscriptionConfig {
            stream: stream.name.clone(),
            subject,
            group: group.into(),
        };
        Self {
            broker,
            handler: Arc::new(handler),
            stream,
            subscription,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Receives messages until `shutdown` resolves, then waits for in-flight
    /// messages to settle and leaves the group.
    ///
    /// Every message is handled on its own task.
    pub async fn run_until<F>(&self, shutdown: F) -> BrokerResult<()>
    where
        F: Future<Output = ()>,
    {
        self.broker.ensure_stream(&self.stream).await?;
        let mut deliveries = self.broker.subscribe(&self.subscription).await?;

        tracing::info!(
            stream = %self.subscription.stream,
            subject = %self.subscription.subject,
            group = %self.subscription.group,
            "Subscribed"
        );

        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, draining in-flight messages");
                    break;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let handler = self.handler.clone();
                        let group = self.subscription.group.clone();
                        in_flight.spawn(
                            async move { process(handler.as_ref(), &group, delivery).await }
                                .with_current_subscriber(),
                        );
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to receive message");
                    }
                    None => {
                        tracing::warn!("Subscription closed by broker");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Message task failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Message task failed");
            }
        }

        drop(deliveries);
        tracing::info!(group = %self.subscription.group, "Unsubscribed");
        Ok(())
    }
}

/// Decodes, dispatches and settles one delivery.
pub async fn process<H: EventHandler + ?Sized>(
    handler: &H,
    group: &str,
    delivery: Delivery,
) -> Outcome {
    let ctx = MessageContext {
        message_id: delivery.header(MESSAGE_ID_HEADER).map(str::to_string),
        subject: delivery.subject.clone(),
        attempt: delivery.attempt,
    };

    let outcome = match handle(handler, &ctx, &delivery).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                message_id = ctx.message_id.as_deref(),
                attempt = ctx.attempt,
                error = %e,
                "Failed to handle message"
            );
            Outcome::Nacked
        }
    };

    let settled = match outcome {
        Outcome::Acked | Outcome::Skipped => delivery.ack().await,
        Outcome::Nacked => delivery.nak().await,
    };
    if let Err(e) = settled {
        // The broker redelivers anything left unsettled
        tracing::error!(error = %e, outcome = outcome.as_str(), "Failed to settle message");
    }

    metrics::counter!(
        "subscriber_messages_total",
        "group" => group.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    outcome
}

async fn handle<H: EventHandler + ?Sized>(
    handler: &H,
    ctx: &MessageContext,
    delivery: &Delivery,
) -> Result<Outcome, HandlerError> {
    let Some(tag) = delivery.header(EVENT_KIND_HEADER) else {
        tracing::warn!(subject = %ctx.subject, "Message has no event kind, skipping");
        return Ok(Outcome::Skipped);
    };

    if !EventKind::from_tag(tag).is_known() {
        tracing::warn!(event_kind = %tag, "Unknown event kind, skipping");
        return Ok(Outcome::Skipped);
    }

    let event = registry::decode(tag, &delivery.payload)
        .map_err(|e| HandlerError::Other(Box::new(e)))?;

    match &event {
        CartEvent::ItemAdded(e) => handler.handle_item_added(ctx, e).await?,
        CartEvent::ItemRemoved(e) => handler.handle_item_removed(ctx, e).await?,
    }

    Ok(Outcome::Acked)
}
