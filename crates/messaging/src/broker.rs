//! Broker abstraction.
//!
//! A broker persists messages on streams and hands them to durable consumer
//! groups. Each [`Delivery`] must be acknowledged (handled) or negatively
//! acknowledged (redeliver later); both consume the delivery.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerResult;

/// Message headers. Only the first value of a multi-valued header is kept.
pub type Headers = HashMap<String, String>;

/// A stream and the subjects it captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: vec![subject.into()],
        }
    }
}

/// Where and as whom a consumer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Stream to read from.
    pub stream: String,
    /// Subject filter within the stream.
    pub subject: String,
    /// Durable consumer group; members share the work.
    pub group: String,
}

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            headers: Headers::new(),
            payload,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(self: Box<Self>) -> BrokerResult<()>;
    async fn nak(self: Box<Self>) -> BrokerResult<()>;
}

/// A message received from a consumer group, awaiting settlement.
pub struct Delivery {
    pub subject: String,
    pub headers: Headers,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u64,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        subject: impl Into<String>,
        headers: Headers,
        payload: Vec<u8>,
        attempt: u64,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            subject: subject.into(),
            headers,
            payload,
            attempt,
            acker,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Confirms the message was handled.
    pub async fn ack(self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    /// Asks the broker to redeliver the message.
    pub async fn nak(self) -> BrokerResult<()> {
        self.acker.nak().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("headers", &self.headers)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Publish/subscribe transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Creates the stream unless it already exists.
    async fn ensure_stream(&self, config: &StreamConfig) -> BrokerResult<()>;

    /// Publishes a message and waits for the broker to store it.
    async fn publish(&self, message: OutboundMessage) -> BrokerResult<()>;

    /// Joins a durable consumer group and streams its deliveries.
    async fn subscribe(
        &self,
        config: &SubscriptionConfig,
    ) -> BrokerResult<BoxStream<'static, BrokerResult<Delivery>>>;
}

#[async_trait]
impl<T: Broker + ?Sized> Broker for Arc<T> {
    async fn ensure_stream(&self, config: &StreamConfig) -> BrokerResult<()> {
        (**self).ensure_stream(config).await
    }

    async fn publish(&self, message: OutboundMessage) -> BrokerResult<()> {
        (**self).publish(message).await
    }

    async fn subscribe(
        &self,
        config: &SubscriptionConfig,
    ) -> BrokerResult<BoxStream<'static, BrokerResult<Delivery>>> {
        (**self).subscribe(config).await
    }
}

/// Checks a subject against a NATS-style filter.
///
/// `*` matches exactly one token, `>` matches one or more trailing tokens.
pub fn subject_matches(subject: &str, filter: &str) -> bool {
    let subject_tokens: Vec<&str> = subject.split('.').collect();
    let filter_tokens: Vec<&str> = filter.split('.').collect();

    let mut s_idx = 0;
    let mut f_idx = 0;

    while s_idx < subject_tokens.len() && f_idx < filter_tokens.len() {
        match filter_tokens[f_idx] {
            ">" => return true,
            "*" => {}
            token if token == subject_tokens[s_idx] => {}
            _ => return false,
        }
        s_idx += 1;
        f_idx += 1;
    }

    s_idx == subject_tokens.len() && f_idx == filter_tokens.len()
}
