//! Idempotent handling on top of at-least-once delivery.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use domain::{ItemAdded, ItemRemoved};
use tokio::sync::Mutex;

use crate::error::HandlerError;
use crate::subscriber::{EventHandler, MessageContext};

/// Default number of message ids remembered.
pub const DEFAULT_WINDOW: usize = 10_000;

#[derive(Debug)]
struct SeenWindow {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenWindow {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn remember(&mut self, id: String) {
        if self.capacity == 0 || !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// Handler wrapper that runs the inner handler at most once per message id.
///
/// Ids are remembered only after the inner handler succeeds, so a failed
/// attempt is retried on redelivery. Messages without an id are always
/// passed through. The window is bounded; the oldest ids are forgotten first.
pub struct Deduplicate<H> {
    inner: H,
    seen: Mutex<SeenWindow>,
}

impl<H: EventHandler> Deduplicate<H> {
    pub fn new(inner: H) -> Self {
        Self::with_window(inner, DEFAULT_WINDOW)
    }

    pub fn with_window(inner: H, capacity: usize) -> Self {
        Self {
            inner,
            seen: Mutex::new(SeenWindow {
                ids: HashSet::new(),
                order: VecDeque::new(),
                capacity,
            }),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    async fn already_handled(&self, ctx: &MessageContext) -> bool {
        let Some(id) = &ctx.message_id else {
            return false;
        };
        let duplicate = self.seen.lock().await.contains(id);
        if duplicate {
            tracing::debug!(message_id = %id, attempt = ctx.attempt, "Skipping duplicate message");
            metrics::counter!("subscriber_duplicates_skipped_total").increment(1);
        }
        duplicate
    }

    async fn mark_handled(&self, ctx: &MessageContext) {
        if let Some(id) = &ctx.message_id {
            self.seen.lock().await.remember(id.clone());
        }
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for Deduplicate<H> {
    async fn handle_item_added(
        &self,
        ctx: &MessageContext,
        event: &ItemAdded,
    ) -> Result<(), HandlerError> {
        if self.already_handled(ctx).await {
            return Ok(());
        }
        self.inner.handle_item_added(ctx, event).await?;
        self.mark_handled(ctx).await;
        Ok(())
    }

    async fn handle_item_removed(
        &self,
        ctx: &MessageContext,
        event: &ItemRemoved,
    ) -> Result<(), HandlerError> {
        if self.already_handled(ctx).await {
            return Ok(());
        }
        self.inner.handle_item_removed(ctx, event).await?;
        self.mark_handled(ctx).await;
        Ok(())
    }
}
