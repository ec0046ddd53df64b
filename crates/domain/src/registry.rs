//! Event registry: the one table of kind names and the codec behind it.
//!
//! The store path and the broker path both name events through [`EventKind`],
//! so a kind string written to the log is the same one sent as a header.

use std::fmt;

use thiserror::Error;

use crate::cart::{CartEvent, ItemAdded, ItemRemoved};

/// Errors raised while turning stored or received bytes back into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The kind name is not one this build knows about.
    #[error("Unknown event kind: {0:?}")]
    UnknownKind(String),

    /// The kind is known but the body does not parse as that event.
    #[error("Malformed {kind} payload: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Kind names of cart events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ItemAdded,
    ItemRemoved,
    /// Sentinel for any name outside the table.
    Unknown,
}

impl EventKind {
    /// Every known kind, in declaration order.
    pub const KNOWN: [EventKind; 2] = [EventKind::ItemAdded, EventKind::ItemRemoved];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ItemAdded => "ItemAdded",
            EventKind::ItemRemoved => "ItemRemoved",
            EventKind::Unknown => "Unknown",
        }
    }

    /// Looks up a kind by its wire name. Never fails; unrecognized names map
    /// to [`EventKind::Unknown`].
    pub fn from_tag(tag: &str) -> EventKind {
        match tag {
            "ItemAdded" => EventKind::ItemAdded,
            "ItemRemoved" => EventKind::ItemRemoved,
            _ => EventKind::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Unknown)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the kind of a cart event.
pub fn kind_of(event: &CartEvent) -> EventKind {
    match event {
        CartEvent::ItemAdded(_) => EventKind::ItemAdded,
        CartEvent::ItemRemoved(_) => EventKind::ItemRemoved,
    }
}

/// Serializes the body of an event (the variant's fields, without a tag).
pub fn encode(event: &CartEvent) -> Result<Vec<u8>, serde_json::Error> {
    match event {
        CartEvent::ItemAdded(body) => serde_json::to_vec(body),
        CartEvent::ItemRemoved(body) => serde_json::to_vec(body),
    }
}

/// Rebuilds an event from its kind name and body.
pub fn decode(kind: &str, payload: &[u8]) -> Result<CartEvent, DecodeError> {
    let malformed = |source| DecodeError::Malformed {
        kind: kind.to_string(),
        source,
    };

    match EventKind::from_tag(kind) {
        EventKind::ItemAdded => serde_json::from_slice::<ItemAdded>(payload)
            .map(CartEvent::ItemAdded)
            .map_err(malformed),
        EventKind::ItemRemoved => serde_json::from_slice::<ItemRemoved>(payload)
            .map(CartEvent::ItemRemoved)
            .map_err(malformed),
        EventKind::Unknown => Err(DecodeError::UnknownKind(kind.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;

    #[test]
    fn tags_resolve_to_their_kind() {
        for kind in EventKind::KNOWN {
            assert_eq!(EventKind::from_tag(kind.as_str()), kind);
        }
        assert_eq!(EventKind::from_tag("ItemPriced"), EventKind::Unknown);
        assert_eq!(EventKind::from_tag(""), EventKind::Unknown);
        assert!(!EventKind::Unknown.is_known());
    }

    #[test]
    fn kind_matches_domain_event_name() {
        use crate::DomainEvent;

        let added = CartEvent::item_added(AggregateId::new("cart-1"), "item-1", 1);
        assert_eq!(kind_of(&added), EventKind::ItemAdded);
        assert_eq!(added.event_kind(), "ItemAdded");

        let removed = CartEvent::item_removed(AggregateId::new("cart-1"), "item-1", 1);
        assert_eq!(kind_of(&removed), EventKind::ItemRemoved);
        assert_eq!(removed.event_kind(), "ItemRemoved");
    }

    #[test]
    fn encoded_body_has_flat_fields() {
        let event = CartEvent::item_added(AggregateId::new("cart-123"), "item-001", 2);
        let value: serde_json::Value = serde_json::from_slice(&encode(&event).unwrap()).unwrap();

        assert_eq!(value["cart_id"], "cart-123");
        assert_eq!(value["item_id"], "item-001");
        assert_eq!(value["quantity"], 2);
        assert!(value["timestamp"].is_string());
        assert!(value.get("ItemAdded").is_none());
    }

    #[test]
    fn decode_reads_body_written_by_another_service() {
        let body = br#"{"cart_id":"cart-9","item_id":"sku-4","quantity":3,"timestamp":"2024-05-01T10:00:00Z"}"#;

        let CartEvent::ItemRemoved(removed) = decode("ItemRemoved", body).unwrap() else {
            panic!("expected ItemRemoved");
        };
        assert_eq!(removed.cart_id.as_str(), "cart-9");
        assert_eq!(removed.item_id, "sku-4");
        assert_eq!(removed.quantity, 3);
    }

    #[test]
    fn decode_unknown_kind_fails() {
        let result = decode("CartCheckedOut", b"{}");
        assert!(matches!(result, Err(DecodeError::UnknownKind(k)) if k == "CartCheckedOut"));
    }

    #[test]
    fn decode_malformed_body_fails() {
        let result = decode("ItemAdded", b"not json");
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));

        let negative = br#"{"cart_id":"c","item_id":"i","quantity":-1,"timestamp":"2024-05-01T10:00:00Z"}"#;
        assert!(matches!(
            decode("ItemAdded", negative),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
