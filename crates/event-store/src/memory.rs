use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, NewEvent, Result, Sequence, StoreError, StoredEvent, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<StoredEvent>,
    last_sequence: i64,
    /// Fail every append whose batch reaches this (0-based) index.
    fail_at_index: Option<usize>,
    unavailable: bool,
}

/// In-memory event store implementation for testing.
///
/// This implementation stores all events in memory and provides
/// the same interface as the PostgreSQL implementation. It can also simulate
/// storage faults so callers can check their failure paths.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Makes appends fail once they reach the event at `index` of a batch.
    ///
    /// `None` turns fault injection off.
    pub async fn fail_appends_at(&self, index: Option<usize>) {
        self.state.write().await.fail_at_index = index;
    }

    /// Simulates the backing storage going away (or coming back).
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    fn check_available(state: &MemoryState) -> Result<()> {
        if state.unavailable {
            return Err(StoreError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn version_of(state: &MemoryState, aggregate_id: &AggregateId) -> Version {
        state
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: &AggregateId,
        events: Vec<NewEvent>,
        options: AppendOptions,
    ) -> Result<Vec<StoredEvent>> {
        validate_events_for_append(aggregate_id, &events)?;

        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let current_version = Self::version_of(&state, aggregate_id);

        // Check expected version if specified
        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(StoreError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected,
                actual: current_version,
            });
        }

        // Stage the whole batch first; nothing becomes visible unless every
        // event makes it through.
        let mut staged = Vec::with_capacity(events.len());
        let mut version = current_version;
        let mut sequence = state.last_sequence;
        for (index, event) in events.into_iter().enumerate() {
            if state.fail_at_index == Some(index) {
                return Err(StoreError::Unavailable(format!(
                    "simulated fault while writing event {index} for {aggregate_id}"
                )));
            }

            version = version.next();
            sequence += 1;
            staged.push(StoredEvent {
                sequence: Sequence::new(sequence),
                aggregate_id: aggregate_id.clone(),
                version,
                event_kind: event.event_kind,
                payload: event.payload,
                timestamp: event.timestamp,
                published_at: None,
            });
        }

        state.last_sequence = sequence;
        state.events.extend(staged.iter().cloned());

        Ok(staged)
    }

    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        Ok(state
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn current_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(Self::version_of(&state, aggregate_id))
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        Ok(state
            .events
            .iter()
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, sequences: &[Sequence]) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let wanted: HashSet<Sequence> = sequences.iter().copied().collect();
        let now = Utc::now();
        for event in state
            .events
            .iter_mut()
            .filter(|e| e.published_at.is_none() && wanted.contains(&e.sequence))
        {
            event.published_at = Some(now);
        }
        Ok(())
    }
}
