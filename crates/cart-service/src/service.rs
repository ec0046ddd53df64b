//! Cart command API: persist first, then publish.

use common::AggregateId;
use domain::{CommandHandler, CommandResult, DomainError, ShoppingCart, ValidationError};
use event_store::{EventStore, Sequence, StoreError, Version};
use messaging::{Broker, Publisher};

use crate::error::CartServiceError;
use crate::locks::KeyedLocks;
use crate::retry::{RetryConfig, retry_with_backoff};

/// Application service for shopping carts.
///
/// Every command runs the same pipeline under a per-cart lock: replay the
/// history, validate, append with an expected version, publish each new
/// event under its message id, then mark the published records. A version
/// conflict (another process appended in between) is retried with backoff.
///
/// While an earlier record of the cart is still unpublished, new events are
/// left to the outbox relay, which sends them after it in version order.
pub struct CartService<S: EventStore, B: Broker> {
    handler: CommandHandler<S, ShoppingCart>,
    publisher: Publisher<B>,
    locks: KeyedLocks,
    retry: RetryConfig,
}

impl<S: EventStore, B: Broker> CartService<S, B> {
    pub fn new(store: S, publisher: Publisher<B>, retry: RetryConfig) -> Self {
        Self {
            handler: CommandHandler::new(store),
            publisher,
            locks: KeyedLocks::new(),
            retry,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        self.handler.store()
    }

    pub fn publisher(&self) -> &Publisher<B> {
        &self.publisher
    }

    /// Adds `quantity` units of `item_id` to the cart.
    #[tracing::instrument(skip(self, cart_id), fields(cart_id = %cart_id))]
    pub async fn add_item(
        &self,
        cart_id: &AggregateId,
        item_id: &str,
        quantity: i64,
    ) -> Result<CommandResult<ShoppingCart>, CartServiceError> {
        self.run(cart_id, "add_item", |cart| cart.add_item(item_id, quantity))
            .await
    }

    /// Removes `quantity` units of `item_id` from the cart.
    #[tracing::instrument(skip(self, cart_id), fields(cart_id = %cart_id))]
    pub async fn remove_item(
        &self,
        cart_id: &AggregateId,
        item_id: &str,
        quantity: i64,
    ) -> Result<CommandResult<ShoppingCart>, CartServiceError> {
        self.run(cart_id, "remove_item", |cart| {
            cart.remove_item(item_id, quantity)
        })
        .await
    }

    /// Replays the cart, or returns None if it has no history.
    pub async fn get_cart(
        &self,
        cart_id: &AggregateId,
    ) -> Result<Option<ShoppingCart>, CartServiceError> {
        Ok(self.handler.load_existing(cart_id).await?)
    }

    async fn run<F>(
        &self,
        cart_id: &AggregateId,
        context: &str,
        command: F,
    ) -> Result<CommandResult<ShoppingCart>, CartServiceError>
    where
        F: Fn(&mut ShoppingCart) -> Result<(), ValidationError>,
    {
        let _guard = self.locks.lock(cart_id).await;

        let result = retry_with_backoff(
            || self.handler.execute(cart_id, &command),
            &self.retry,
            DomainError::is_conflict,
            context,
        )
        .await?;

        self.publish(cart_id, &result).await?;

        tracing::info!(
            events = result.events.len(),
            version = %result.new_version,
            "Command completed"
        );
        Ok(result)
    }

    /// Publishes the committed events in order and marks the ones that made
    /// it. Stops at the first failure.
    async fn publish(
        &self,
        cart_id: &AggregateId,
        result: &CommandResult<ShoppingCart>,
    ) -> Result<(), CartServiceError> {
        let Some(first) = result.events.first() else {
            return Ok(());
        };

        match self.unpublished_before(cart_id, first.record.version).await {
            Ok(None) => {}
            Ok(Some(pending)) => {
                tracing::info!(%pending, "Earlier event unpublished, leaving publish to the outbox relay");
                return Err(CartServiceError::Deferred {
                    version: result.new_version,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check for unpublished events");
                return Err(CartServiceError::Deferred {
                    version: result.new_version,
                });
            }
        }

        let mut published = Vec::with_capacity(result.events.len());

        for recorded in &result.events {
            if let Err(source) = self.publisher.publish_recorded(recorded).await {
                self.confirm(&published).await;
                return Err(CartServiceError::Publish {
                    version: recorded.record.version,
                    source,
                });
            }
            published.push(recorded.record.sequence);
        }

        self.confirm(&published).await;
        Ok(())
    }

    /// Oldest version below `version` the broker has not confirmed yet.
    async fn unpublished_before(
        &self,
        cart_id: &AggregateId,
        version: Version,
    ) -> Result<Option<Version>, StoreError> {
        let records = self.store().load(cart_id).await?;
        Ok(records
            .iter()
            .find(|record| record.version < version && !record.is_published())
            .map(|record| record.version))
    }

    async fn confirm(&self, sequences: &[Sequence]) {
        if sequences.is_empty() {
            return;
        }
        // The relay re-sends anything left unmarked; the message id keeps
        // that harmless.
        if let Err(e) = self.store().mark_published(sequences).await {
            tracing::warn!(error = %e, "Failed to mark events as published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{InMemoryEventStore, Version};
    use messaging::{EVENT_KIND_HEADER, InMemoryBroker, MESSAGE_ID_HEADER};

    fn service(
        store: &InMemoryEventStore,
        broker: &InMemoryBroker,
    ) -> CartService<InMemoryEventStore, InMemoryBroker> {
        CartService::new(
            store.clone(),
            Publisher::new(broker.clone()),
            RetryConfig::default(),
        )
    }

    #[tokio::test]
    async fn add_item_stores_publishes_and_marks() {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let service = service(&store, &broker);
        let cart_id = AggregateId::new("cart-1");

        let result = service.add_item(&cart_id, "item-1", 2).await.unwrap();

        assert_eq!(result.new_version, Version::first());
        assert!(result.aggregate.pending_events().is_empty());
        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].header(EVENT_KIND_HEADER), Some("ItemAdded"));
        assert_eq!(published[0].header(MESSAGE_ID_HEADER), Some("cart-1:1"));
        assert!(store.unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_command_touches_nothing() {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let service = service(&store, &broker);
        let cart_id = AggregateId::new("cart-1");

        let err = service.add_item(&cart_id, "item-1", 0).await.unwrap_err();

        assert!(err.as_validation().is_some());
        assert_eq!(store.event_count().await, 0);
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn remove_item_updates_cart() {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let service = service(&store, &broker);
        let cart_id = AggregateId::new("cart-1");

        service.add_item(&cart_id, "item-1", 5).await.unwrap();
        let result = service.remove_item(&cart_id, "item-1", 2).await.unwrap();

        assert_eq!(result.aggregate.quantity_of("item-1"), 3);
        assert_eq!(result.new_version, Version::new(2));

        let err = service
            .remove_item(&cart_id, "item-1", 4)
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_validation(),
            Some(ValidationError::InsufficientQuantity { .. })
        ));
    }

    #[tokio::test]
    async fn get_cart_returns_none_for_unknown_cart() {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let service = service(&store, &broker);

        assert!(
            service
                .get_cart(&AggregateId::new("nobody"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn publish_failure_keeps_events_unpublished() {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let service = service(&store, &broker);
        let cart_id = AggregateId::new("cart-1");
        broker.fail_publishes(true).await;

        let err = service.add_item(&cart_id, "item-1", 2).await.unwrap_err();

        assert!(matches!(
            err,
            CartServiceError::Publish { version, .. } if version == Version::first()
        ));
        assert_eq!(store.event_count().await, 1);
        assert_eq!(store.unpublished(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn later_command_waits_behind_unpublished_history() {
        let store = InMemoryEventStore::new();
        let broker = InMemoryBroker::new();
        let service = service(&store, &broker);
        let cart_id = AggregateId::new("cart-1");

        broker.fail_publishes(true).await;
        service.add_item(&cart_id, "item-1", 1).await.unwrap_err();
        broker.fail_publishes(false).await;

        let err = service.add_item(&cart_id, "item-2", 1).await.unwrap_err();

        assert!(matches!(
            err,
            CartServiceError::Deferred { version } if version == Version::new(2)
        ));
        assert!(broker.published().await.is_empty());
        assert_eq!(store.unpublished(10).await.unwrap().len(), 2);
    }
}
