//! In-memory broker for tests and local runs.
//!
//! Mirrors the JetStream semantics the services rely on: publishes need a
//! stream that captures the subject, a repeated message id is dropped, each
//! consumer group sees every message once (members compete for them), a new
//! group starts from the beginning of the stream, and a negative
//! acknowledgement puts the message back for redelivery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{Mutex, mpsc};

use crate::broker::{
    Acknowledger, Broker, Delivery, OutboundMessage, StreamConfig, SubscriptionConfig,
    subject_matches,
};
use crate::error::{BrokerError, BrokerResult};
use crate::{EVENT_KIND_HEADER, MESSAGE_ID_HEADER};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Nacked,
}

/// One settlement seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub group: String,
    pub event_kind: Option<String>,
    pub message_id: Option<String>,
    pub attempt: u64,
    pub outcome: AckOutcome,
}

#[derive(Debug, Clone)]
struct Envelope {
    message: OutboundMessage,
    attempt: u64,
}

struct Group {
    filter: String,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Vec<String>>,
    log: Vec<OutboundMessage>,
    seen_ids: HashSet<String>,
    groups: HashMap<String, Group>,
    acks: Vec<AckRecord>,
    fail_publishes: bool,
    max_deliver: Option<u64>,
}

impl State {
    fn stream_for(&self, subject: &str) -> Option<&str> {
        self.streams
            .iter()
            .find(|(_, subjects)| subjects.iter().any(|f| subject_matches(subject, f)))
            .map(|(name, _)| name.as_str())
    }
}

/// Broker implementation backed by in-process channels.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops redelivering a message once it has been delivered `max` times.
    pub fn with_max_deliver(max: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                max_deliver: Some(max),
                ..State::default()
            })),
        }
    }

    /// Makes every publish fail with a transport error (or succeed again).
    pub async fn fail_publishes(&self, fail: bool) {
        self.state.lock().await.fail_publishes = fail;
    }

    /// Every message accepted by the broker, in publish order.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().await.log.clone()
    }

    /// Every settlement so far, in the order they happened.
    pub async fn acknowledgements(&self) -> Vec<AckRecord> {
        self.state.lock().await.acks.clone()
    }

    pub async fn has_stream(&self, name: &str) -> bool {
        self.state.lock().await.streams.contains_key(name)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_stream(&self, config: &StreamConfig) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        state
            .streams
            .entry(config.name.clone())
            .or_insert_with(|| config.subjects.clone());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> BrokerResult<()> {
        let mut state = self.state.lock().await;

        if state.fail_publishes {
            return Err(BrokerError::Publish(format!(
                "simulated transport failure on {}",
                message.subject
            )));
        }
        if state.stream_for(&message.subject).is_none() {
            return Err(BrokerError::NoStream(message.subject));
        }

        // Duplicate window: a repeated message id is accepted but not stored
        if let Some(id) = message.header(MESSAGE_ID_HEADER)
            && !state.seen_ids.insert(id.to_string())
        {
            tracing::debug!(message_id = %id, "Dropping duplicate publish");
            return Ok(());
        }

        for group in state.groups.values() {
            if subject_matches(&message.subject, &group.filter) {
                let _ = group.sender.send(Envelope {
                    message: message.clone(),
                    attempt: 1,
                });
            }
        }
        state.log.push(message);

        Ok(())
    }

    async fn subscribe(
        &self,
        config: &SubscriptionConfig,
    ) -> BrokerResult<BoxStream<'static, BrokerResult<Delivery>>> {
        let mut state = self.state.lock().await;

        if !state.streams.contains_key(&config.stream) {
            return Err(BrokerError::Subscribe(format!(
                "stream {} not found",
                config.stream
            )));
        }

        if !state.groups.contains_key(&config.group) {
            let (sender, receiver) = mpsc::unbounded_channel();
            // A new durable consumer starts from the first stored message
            for message in state
                .log
                .iter()
                .filter(|m| subject_matches(&m.subject, &config.subject))
            {
                let _ = sender.send(Envelope {
                    message: message.clone(),
                    attempt: 1,
                });
            }
            state.groups.insert(
                config.group.clone(),
                Group {
                    filter: config.subject.clone(),
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                },
            );
        }

        let group = &state.groups[&config.group];
        let receiver = group.receiver.clone();
        let sender = group.sender.clone();
        let group_name = config.group.clone();
        let broker_state = self.state.clone();

        let stream = async_stream::stream! {
            loop {
                let next = receiver.lock().await.recv().await;
                let Some(envelope) = next else {
                    break;
                };

                let acker = MemoryAcker {
                    state: broker_state.clone(),
                    sender: sender.clone(),
                    group: group_name.clone(),
                    envelope: envelope.clone(),
                };
                yield Ok(Delivery::new(
                    envelope.message.subject,
                    envelope.message.headers,
                    envelope.message.payload,
                    envelope.attempt,
                    Box::new(acker),
                ));
            }
        };

        Ok(stream.boxed())
    }
}

struct MemoryAcker {
    state: Arc<Mutex<State>>,
    sender: mpsc::UnboundedSender<Envelope>,
    group: String,
    envelope: Envelope,
}

impl MemoryAcker {
    async fn record(&self, outcome: AckOutcome) -> Option<u64> {
        let mut state = self.state.lock().await;
        state.acks.push(AckRecord {
            group: self.group.clone(),
            event_kind: self
                .envelope
                .message
                .header(EVENT_KIND_HEADER)
                .map(str::to_string),
            message_id: self
                .envelope
                .message
                .header(MESSAGE_ID_HEADER)
                .map(str::to_string),
            attempt: self.envelope.attempt,
            outcome,
        });
        state.max_deliver
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> BrokerResult<()> {
        self.record(AckOutcome::Acked).await;
        Ok(())
    }

    async fn nak(self: Box<Self>) -> BrokerResult<()> {
        let max_deliver = self.record(AckOutcome::Nacked).await;
        if max_deliver.is_some_and(|max| self.envelope.attempt >= max) {
            tracing::debug!(
                attempt = self.envelope.attempt,
                "Delivery limit reached, not redelivering"
            );
            return Ok(());
        }

        self.sender
            .send(Envelope {
                message: self.envelope.message.clone(),
                attempt: self.envelope.attempt + 1,
            })
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
