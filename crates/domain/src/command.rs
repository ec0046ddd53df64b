//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventStore, NewEvent, StoredEvent, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// A domain event together with the log record it was committed as.
#[derive(Debug, Clone)]
pub struct Recorded<E> {
    pub event: E,
    pub record: StoredEvent,
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted, in commit order.
    pub events: Vec<Recorded<A::Event>>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Handler for executing commands against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the aggregate's history from the event store and replaying it
/// 2. Running the command, which stages events on the aggregate
/// 3. Persisting the staged events with an expected-version check
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate has no history, returns an empty instance at
    /// `Version::initial()`.
    pub async fn load(&self, aggregate_id: &AggregateId) -> Result<A, DomainError> {
        let records = self.store.load(aggregate_id).await?;

        let mut aggregate = A::new(aggregate_id.clone());
        for record in records {
            let event = A::Event::decode(&record.event_kind, &record.payload)?;
            aggregate.apply(&event);
            aggregate.set_version(record.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it has no history.
    pub async fn load_existing(&self, aggregate_id: &AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.version() > Version::initial() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the replayed aggregate and stages
    /// events on it, or rejects the command. The append expects the version
    /// that was loaded, so a concurrent writer turns into a conflict.
    #[tracing::instrument(skip(self, command_fn), fields(aggregate_type = A::aggregate_type()))]
    pub async fn execute<F>(
        &self,
        aggregate_id: &AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&mut A) -> Result<(), A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        command_fn(&mut aggregate)?;
        let events = aggregate.take_pending_events();

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        // Encode everything before touching the store
        let new_events = events
            .iter()
            .map(|event| {
                Ok(NewEvent::new(event.event_kind(), event.encode()?).at(event.occurred_at()))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let records = self
            .store
            .append(
                aggregate_id,
                new_events,
                AppendOptions::expect_version(current_version),
            )
            .await?;

        let new_version = records.last().map_or(current_version, |r| r.version);
        aggregate.apply_events(&events);
        aggregate.set_version(new_version);

        metrics::counter!("events_appended_total", "aggregate_type" => A::aggregate_type())
            .increment(records.len() as u64);
        tracing::debug!(
            count = records.len(),
            version = %new_version,
            "Persisted events"
        );

        let events = events
            .into_iter()
            .zip(records)
            .map(|(event, record)| Recorded { event, record })
            .collect();

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }
}
