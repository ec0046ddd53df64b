//! Outbox relay: republishes stored events the broker never confirmed.

use std::collections::HashSet;
use std::time::Duration;

use common::AggregateId;
use event_store::{EventStore, StoredEvent};
use messaging::{Broker, Publisher};
use tokio::time::MissedTickBehavior;

use crate::error::OutboxError;

/// Default number of records read per sweep.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Records read from the store.
    pub scanned: usize,
    /// Records published and marked.
    pub published: usize,
    /// Records the broker refused.
    pub failed: usize,
    /// Later records of a cart whose earlier record failed.
    pub held: usize,
}

/// Sweeps the event log for records with no `published_at` and sends them.
///
/// Records go out oldest first under their message id, with the stored kind
/// and body as they are, so a record the command path already delivered is
/// dropped by the broker's duplicate window. When a record cannot be sent,
/// the rest of that cart waits for the next sweep; other carts carry on.
pub struct OutboxRelay<S: EventStore, B: Broker> {
    store: S,
    publisher: Publisher<B>,
    batch_size: usize,
}

impl<S: EventStore, B: Broker> OutboxRelay<S, B> {
    pub fn new(store: S, publisher: Publisher<B>) -> Self {
        Self {
            store,
            publisher,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publishes one batch of unpublished records.
    ///
    /// Only store failures are returned; send failures are logged, counted
    /// and reported.
    pub async fn relay_once(&self) -> Result<RelayReport, OutboxError> {
        let records = self.store.unpublished(self.batch_size).await?;
        let mut report = RelayReport {
            scanned: records.len(),
            ..RelayReport::default()
        };

        let mut sent = Vec::with_capacity(records.len());
        let mut blocked: HashSet<&AggregateId> = HashSet::new();
        for record in &records {
            if blocked.contains(&record.aggregate_id) {
                report.held += 1;
                continue;
            }
            match self.send(record).await {
                Ok(()) => sent.push(record.sequence),
                Err(e) => {
                    tracing::error!(error = %e, cart_id = %record.aggregate_id, "Outbox record not published");
                    metrics::counter!("outbox_failures_total").increment(1);
                    blocked.insert(&record.aggregate_id);
                    report.failed += 1;
                }
            }
        }

        if !sent.is_empty() {
            self.store.mark_published(&sent).await?;
            report.published = sent.len();
            metrics::counter!("outbox_relayed_total").increment(sent.len() as u64);
        }

        Ok(report)
    }

    async fn send(&self, record: &StoredEvent) -> Result<(), OutboxError> {
        let message_id = record.message_id();
        self.publisher
            .publish_raw(&record.event_kind, record.payload.clone(), &message_id)
            .await
            .map_err(|source| OutboxError::Publish { message_id, source })
    }

    /// Sweeps every `interval` until `shutdown` resolves.
    ///
    /// A full batch is followed by another sweep straight away.
    pub async fn run_until<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_ms = interval.as_millis() as u64, "Outbox relay started");

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => self.drain().await,
            }
        }

        tracing::info!("Outbox relay stopped");
    }

    async fn drain(&self) {
        loop {
            match self.relay_once().await {
                Ok(report) => {
                    if report.published > 0 {
                        tracing::info!(published = report.published, "Relayed outbox records");
                    }
                    if report.failed > 0 {
                        tracing::warn!(
                            failed = report.failed,
                            held = report.held,
                            "Outbox records left for the next sweep"
                        );
                    }
                    // A full batch that moved nothing would be read again as is
                    if report.scanned < self.batch_size || report.published == 0 {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Outbox sweep failed");
                    return;
                }
            }
        }
    }
}
