//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;

use crate::registry::DecodeError;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Clone + Send + Sync + Sized {
    /// Returns the kind name stored next to the payload and sent as a
    /// message header.
    fn event_kind(&self) -> &'static str;

    /// When the fact happened.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Serializes the event body.
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error>;

    /// Rebuilds an event from its kind name and body.
    fn decode(kind: &str, payload: &[u8]) -> Result<Self, DecodeError>;
}

/// Trait for aggregates in an event-sourced system.
///
/// In event sourcing, aggregates:
/// - Are rebuilt by replaying events
/// - Stage new events while executing a command
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors a command on this aggregate can produce.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Creates an empty aggregate with no history.
    fn new(id: AggregateId) -> Self;

    /// Returns the aggregate's identifier.
    fn id(&self) -> &AggregateId;

    /// Returns the version of the last applied stored event.
    ///
    /// Version starts at 0 for an aggregate without history.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the command handler after loading events.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic. It must not fail
    /// (events represent facts that have happened).
    fn apply(&mut self, event: &Self::Event);

    /// Returns the events staged by the current command and clears them.
    fn take_pending_events(&mut self) -> Vec<Self::Event>;

    /// Applies multiple events in sequence.
    fn apply_events<'a>(&mut self, events: impl IntoIterator<Item = &'a Self::Event>)
    where
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds an aggregate by replaying its history in order.
    fn reconstruct(id: AggregateId, history: &[Self::Event]) -> Self {
        let mut aggregate = Self::new(id);
        aggregate.apply_events(history);
        aggregate
    }
}
