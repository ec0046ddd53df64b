//! Messaging layer for cart events.
//!
//! - [`Broker`]: the publish/subscribe transport, with a NATS JetStream
//!   adapter and an in-memory adapter for tests and local runs
//! - [`Publisher`]: sends cart events with their kind header
//! - [`EventSubscriber`]: receives, decodes and dispatches them to an
//!   [`EventHandler`], acknowledging only after the handler succeeds
//! - [`Deduplicate`]: handler wrapper that skips redelivered messages

pub mod broker;
pub mod dedup;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod publisher;
pub mod subscriber;

pub use broker::{
    Acknowledger, Broker, Delivery, Headers, OutboundMessage, StreamConfig, SubscriptionConfig,
};
pub use dedup::Deduplicate;
pub use error::{BrokerError, BrokerResult, HandlerError, PublishError};
pub use jetstream::JetStreamBroker;
pub use memory::{AckOutcome, AckRecord, InMemoryBroker};
pub use publisher::Publisher;
pub use subscriber::{EventHandler, EventSubscriber, MessageContext, Outcome};

/// Stream holding every cart event.
pub const DEFAULT_STREAM: &str = "cart";

/// Subject cart events are published on.
pub const DEFAULT_SUBJECT: &str = "cart.events";

/// Durable consumer group shared by billing instances.
pub const DEFAULT_CONSUMER_GROUP: &str = "billing-service";

/// Header carrying the registry kind name of the body.
pub const EVENT_KIND_HEADER: &str = "event_kind";

/// Header JetStream uses to drop duplicate publishes.
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";
