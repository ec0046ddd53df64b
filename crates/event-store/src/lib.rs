//! Append-only, per-aggregate event log.
//!
//! Records are opaque (`event_kind` + JSON bytes); decoding them into domain
//! events is the caller's business. Two backends share the [`EventStore`]
//! trait: [`InMemoryEventStore`] for tests and [`PostgresEventStore`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{Result, StoreError};
pub use event::{NewEvent, Sequence, StoredEvent, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};
