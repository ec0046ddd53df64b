//! Domain layer for the shopping cart.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - The event registry that names, encodes and decodes cart events
//! - CommandHandler, the load/replay/append loop every command goes through
//! - The ShoppingCart aggregate and its events

pub mod aggregate;
pub mod cart;
pub mod command;
pub mod error;
pub mod registry;

pub use aggregate::{Aggregate, DomainEvent};
pub use cart::{CartEvent, ItemAdded, ItemRemoved, ShoppingCart, ValidationError};
pub use command::{CommandHandler, CommandResult, Recorded};
pub use error::DomainError;
pub use registry::{DecodeError, EventKind};
