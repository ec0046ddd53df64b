//! Billing reactions to cart events.

use std::sync::Mutex;

use async_trait::async_trait;
use domain::{ItemAdded, ItemRemoved};
use messaging::{EventHandler, HandlerError, MessageContext};
use serde::Serialize;

/// Running totals of the events billing has handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BillingStats {
    pub items_added: u64,
    pub items_removed: u64,
    pub units_added: u64,
    pub units_removed: u64,
}

/// Logs every cart event with structured fields and counts it.
#[derive(Debug, Default)]
pub struct BillingService {
    stats: Mutex<BillingStats>,
}

impl BillingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the totals so far.
    pub fn stats(&self) -> BillingStats {
        self.stats.lock().map(|s| *s).unwrap_or_else(|e| *e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut BillingStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }
}

#[async_trait]
impl EventHandler for BillingService {
    async fn handle_item_added(
        &self,
        ctx: &MessageContext,
        event: &ItemAdded,
    ) -> Result<(), HandlerError> {
        tracing::info!(
            cart_id = %event.cart_id,
            item_id = %event.item_id,
            quantity = event.quantity,
            message_id = ctx.message_id.as_deref(),
            attempt = ctx.attempt,
            "Item added to cart"
        );

        metrics::counter!("billing_items_added_total").increment(1);
        metrics::counter!("billing_units_added_total").increment(u64::from(event.quantity));
        self.update(|s| {
            s.items_added += 1;
            s.units_added += u64::from(event.quantity);
        });
        Ok(())
    }

    async fn handle_item_removed(
        &self,
        ctx: &MessageContext,
        event: &ItemRemoved,
    ) -> Result<(), HandlerError> {
        tracing::info!(
            cart_id = %event.cart_id,
            item_id = %event.item_id,
            quantity = event.quantity,
            message_id = ctx.message_id.as_deref(),
            attempt = ctx.attempt,
            "Item removed from cart"
        );

        metrics::counter!("billing_items_removed_total").increment(1);
        metrics::counter!("billing_units_removed_total").increment(u64::from(event.quantity));
        self.update(|s| {
            s.items_removed += 1;
            s.units_removed += u64::from(event.quantity);
        });
        Ok(())
    }
}
