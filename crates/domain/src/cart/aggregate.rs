//! Shopping cart aggregate implementation.

use std::collections::HashMap;

use common::AggregateId;
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{CartEvent, ValidationError};

/// Shopping cart aggregate root.
///
/// Never stored directly: each command rebuilds it from the cart's event log,
/// stages new events, and the instance is dropped once they are persisted.
#[derive(Debug, Clone)]
pub struct ShoppingCart {
    id: AggregateId,

    /// Version of the last replayed stored event.
    version: Version,

    /// Quantity per item id. Replay subtracts removals unconditionally, so a
    /// history written elsewhere can leave a quantity below zero.
    items: HashMap<String, i64>,

    /// Events produced by the current command, oldest first.
    pending_events: Vec<CartEvent>,
}

impl Aggregate for ShoppingCart {
    type Event = CartEvent;
    type Error = ValidationError;

    fn aggregate_type() -> &'static str {
        "ShoppingCart"
    }

    fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::initial(),
            items: HashMap::new(),
            pending_events: Vec::new(),
        }
    }

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: &CartEvent) {
        *self.items.entry(event.item_id().to_string()).or_insert(0) += event.quantity_delta();
    }

    fn take_pending_events(&mut self) -> Vec<CartEvent> {
        std::mem::take(&mut self.pending_events)
    }
}

// Query methods
impl ShoppingCart {
    /// Returns every item with its replayed quantity.
    pub fn items(&self) -> &HashMap<String, i64> {
        &self.items
    }

    /// Returns the replayed quantity of one item (0 if never seen).
    pub fn quantity_of(&self, item_id: &str) -> i64 {
        self.items.get(item_id).copied().unwrap_or(0)
    }

    /// Returns the number of distinct items with a positive quantity.
    pub fn item_count(&self) -> usize {
        self.items.values().filter(|q| **q > 0).count()
    }

    /// Returns the sum of all quantities.
    pub fn total_quantity(&self) -> i64 {
        self.items.values().sum()
    }

    /// Returns true if nothing is in the cart.
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Events staged so far by the current command.
    pub fn pending_events(&self) -> &[CartEvent] {
        &self.pending_events
    }

    /// Quantity once the staged events are applied too.
    fn projected_quantity(&self, item_id: &str) -> i64 {
        self.quantity_of(item_id)
            + self
                .pending_events
                .iter()
                .filter(|e| e.item_id() == item_id)
                .map(CartEvent::quantity_delta)
                .sum::<i64>()
    }
}

// Command methods (stage events)
impl ShoppingCart {
    /// Stages an ItemAdded event.
    ///
    /// Does not touch `items`; the event is applied once it is persisted.
    pub fn add_item(
        &mut self,
        item_id: impl Into<String>,
        quantity: i64,
    ) -> Result<(), ValidationError> {
        let item_id = item_id.into();
        let quantity = validate_request(&item_id, quantity)?;

        self.pending_events
            .push(CartEvent::item_added(self.id.clone(), item_id, quantity));
        Ok(())
    }

    /// Stages an ItemRemoved event.
    ///
    /// Rejects removing more units than the cart holds.
    pub fn remove_item(
        &mut self,
        item_id: impl Into<String>,
        quantity: i64,
    ) -> Result<(), ValidationError> {
        let item_id = item_id.into();
        let requested = validate_request(&item_id, quantity)?;

        let available = self.projected_quantity(&item_id);
        if available < quantity {
            return Err(ValidationError::InsufficientQuantity {
                item_id,
                requested: quantity,
                available,
            });
        }

        self.pending_events
            .push(CartEvent::item_removed(self.id.clone(), item_id, requested));
        Ok(())
    }
}

fn validate_request(item_id: &str, quantity: i64) -> Result<u32, ValidationError> {
    if item_id.trim().is_empty() {
        return Err(ValidationError::EmptyItemId);
    }
    if quantity <= 0 {
        return Err(ValidationError::NonPositiveQuantity { quantity });
    }
    u32::try_from(quantity).map_err(|_| ValidationError::QuantityTooLarge { quantity })
}
