use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AggregateId;

/// Store-assigned position of a record in the whole log.
///
/// Sequences are strictly increasing across all aggregates and are never
/// reused, so they double as the commit order of the log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    /// Creates a sequence from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version number for an aggregate, used for optimistic concurrency control.
///
/// Versions start at 1 for the first event and increment by 1 for each
/// subsequent event on an aggregate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An encoded event waiting to be appended.
///
/// The store never looks inside `payload`; it only keeps the bytes next to the
/// `event_kind` discriminator that tells readers how to decode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Discriminator naming the event variant (e.g. "ItemAdded").
    pub event_kind: String,

    /// JSON-encoded event body.
    pub payload: Vec<u8>,

    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl NewEvent {
    /// Creates a new event stamped with the current time.
    pub fn new(event_kind: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            event_kind: event_kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Overrides the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A committed record of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Global, store-assigned position.
    pub sequence: Sequence,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The version of the aggregate after this event.
    pub version: Version,

    /// Discriminator naming the event variant.
    pub event_kind: String,

    /// JSON-encoded event body.
    pub payload: Vec<u8>,

    /// When the event happened.
    pub timestamp: DateTime<Utc>,

    /// When the event was confirmed on the broker, if it has been.
    pub published_at: Option<DateTime<Utc>>,
}

impl StoredEvent {
    /// Identity used for broker-side and consumer-side de-duplication.
    ///
    /// Stable across retries of the same record: `"{aggregate_id}:{version}"`.
    pub fn message_id(&self) -> String {
        format!("{}:{}", self.aggregate_id, self.version)
    }

    /// Returns true once the record has been confirmed on the broker.
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}
