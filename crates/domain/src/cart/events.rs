//! Cart domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::registry::{self, DecodeError};

/// Events that can occur on a shopping cart.
///
/// The set is closed: every match over it is exhaustive, so adding a variant
/// forces the registry, the codec and the handlers to be updated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    /// Units of an item were put in the cart.
    ItemAdded(ItemAdded),

    /// Units of an item were taken out of the cart.
    ItemRemoved(ItemRemoved),
}

/// Body of the ItemAdded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub cart_id: AggregateId,
    pub item_id: String,
    pub quantity: u32,
    pub timestamp: DateTime<Utc>,
}

/// Body of the ItemRemoved event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub cart_id: AggregateId,
    pub item_id: String,
    pub quantity: u32,
    pub timestamp: DateTime<Utc>,
}

impl CartEvent {
    /// Creates an ItemAdded event stamped with the current time.
    pub fn item_added(cart_id: AggregateId, item_id: impl Into<String>, quantity: u32) -> Self {
        CartEvent::ItemAdded(ItemAdded {
            cart_id,
            item_id: item_id.into(),
            quantity,
            timestamp: Utc::now(),
        })
    }

    /// Creates an ItemRemoved event stamped with the current time.
    pub fn item_removed(cart_id: AggregateId, item_id: impl Into<String>, quantity: u32) -> Self {
        CartEvent::ItemRemoved(ItemRemoved {
            cart_id,
            item_id: item_id.into(),
            quantity,
            timestamp: Utc::now(),
        })
    }

    pub fn cart_id(&self) -> &AggregateId {
        match self {
            CartEvent::ItemAdded(e) => &e.cart_id,
            CartEvent::ItemRemoved(e) => &e.cart_id,
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            CartEvent::ItemAdded(e) => &e.item_id,
            CartEvent::ItemRemoved(e) => &e.item_id,
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            CartEvent::ItemAdded(e) => e.quantity,
            CartEvent::ItemRemoved(e) => e.quantity,
        }
    }

    /// Signed effect of the event on the item's quantity.
    pub fn quantity_delta(&self) -> i64 {
        match self {
            CartEvent::ItemAdded(e) => i64::from(e.quantity),
            CartEvent::ItemRemoved(e) => -i64::from(e.quantity),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CartEvent::ItemAdded(e) => e.timestamp,
            CartEvent::ItemRemoved(e) => e.timestamp,
        }
    }
}

impl DomainEvent for CartEvent {
    fn event_kind(&self) -> &'static str {
        registry::kind_of(self).as_str()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp()
    }

    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        registry::encode(self)
    }

    fn decode(kind: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        registry::decode(kind, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_cover_both_variants() {
        let added = CartEvent::item_added(AggregateId::new("cart-1"), "item-1", 4);
        assert_eq!(added.cart_id().as_str(), "cart-1");
        assert_eq!(added.item_id(), "item-1");
        assert_eq!(added.quantity(), 4);
        assert_eq!(added.quantity_delta(), 4);

        let removed = CartEvent::item_removed(AggregateId::new("cart-1"), "item-1", 3);
        assert_eq!(removed.quantity_delta(), -3);
        assert!(removed.timestamp() >= added.timestamp());
    }

    #[test]
    fn encode_then_decode_keeps_the_event() {
        let event = CartEvent::item_removed(AggregateId::new("cart-1"), "item-1", 3);
        let bytes = event.encode().unwrap();
        let decoded = CartEvent::decode(event.event_kind(), &bytes).unwrap();
        assert_eq!(decoded, event);
    }
}
