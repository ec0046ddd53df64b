//! Shopping cart aggregate and related types.

mod aggregate;
mod events;

pub use aggregate::ShoppingCart;
pub use events::{CartEvent, ItemAdded, ItemRemoved};

use thiserror::Error;

/// Reasons a cart command is rejected before anything is staged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Quantity must be greater than zero.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    NonPositiveQuantity { quantity: i64 },

    /// Quantity does not fit the event's field.
    #[error("Invalid quantity: {quantity} (must be at most 4294967295)")]
    QuantityTooLarge { quantity: i64 },

    /// Item id is required.
    #[error("Item ID is required")]
    EmptyItemId,

    /// Removing more than the cart holds.
    #[error("Cannot remove {requested} of {item_id}: only {available} in cart")]
    InsufficientQuantity {
        item_id: String,
        requested: i64,
        available: i64,
    },
}
