//! Identifier types and process setup shared by every crate in the workspace.

pub mod telemetry;
mod types;

pub use telemetry::{LogFormat, init_tracing};
pub use types::AggregateId;
