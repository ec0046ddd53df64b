use async_trait::async_trait;

use crate::{AggregateId, NewEvent, Result, Sequence, StoreError, StoredEvent, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the aggregate for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the aggregate to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the aggregate to not exist (new aggregate).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Core trait for event log implementations.
///
/// An event log persists and retrieves events per aggregate. Within one
/// aggregate, records come back in exactly the order they were committed.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to one aggregate's log.
    ///
    /// The batch is atomic: either every event is committed or none is.
    /// If `options.expected_version` is set, the operation fails with
    /// `ConcurrencyConflict` when the log has moved past that version.
    ///
    /// Returns the committed records, in batch order.
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Vec<StoredEvent>>;

    /// Retrieves all events for a specific aggregate, oldest first.
    ///
    /// An aggregate without events yields an empty vector.
    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>>;

    /// Gets the current version of an aggregate (`Version::initial()` if it
    /// has no events).
    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version>;

    /// Returns up to `limit` records not yet confirmed on the broker, in
    /// commit order.
    async fn unpublished(&self, limit: usize) -> Result<Vec<StoredEvent>>;

    /// Marks records as confirmed on the broker. Unknown or already published
    /// sequences are ignored.
    async fn mark_published(&self, sequences: &[Sequence]) -> Result<()>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_one(
        &self,
        aggregate_id: &AggregateId,
        event: NewEvent,
        options: AppendOptions,
    ) -> Result<StoredEvent> {
        let mut stored = self.append(aggregate_id, vec![event], options).await?;
        stored
            .pop()
            .ok_or_else(|| StoreError::InvalidAppend("store returned no record".to_string()))
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<bool> {
        Ok(self.current_version(aggregate_id).await? > Version::initial())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for std::sync::Arc<T> {
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Vec<StoredEvent>> {
        (**self).append(aggregate_id, events, options).await
    }

    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>> {
        (**self).load(aggregate_id).await
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        (**self).current_version(aggregate_id).await
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        (**self).unpublished(limit).await
    }

    async fn mark_published(&self, sequences: &[Sequence]) -> Result<()> {
        (**self).mark_published(sequences).await
    }
}

/// Validates a batch before appending.
pub fn validate_events_for_append(
    aggregate_id: &AggregateId,
    events: &[NewEvent],
) -> std::result::Result<(), StoreError> {
    if aggregate_id.is_blank() {
        return Err(StoreError::InvalidAppend(
            "Aggregate id must not be blank".to_string(),
        ));
    }

    if events.is_empty() {
        return Err(StoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    }

    for (index, event) in events.iter().enumerate() {
        if event.event_kind.trim().is_empty() {
            return Err(StoreError::InvalidAppend(format!(
                "Event {index} has no event kind"
            )));
        }
        if event.payload.is_empty() {
            return Err(StoreError::InvalidAppend(format!(
                "Event {index} ({}) has an empty payload",
                event.event_kind
            )));
        }
    }

    Ok(())
}
