//! End-to-end tests: publisher -> in-memory broker -> subscriber.

use std::future::{Future, ready};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{CartEvent, ItemAdded, ItemRemoved};
use messaging::{
    AckOutcome, Broker, Deduplicate, EventHandler, EventSubscriber, HandlerError,
    InMemoryBroker, MessageContext, OutboundMessage, Publisher, EVENT_KIND_HEADER,
};
use tokio::sync::oneshot;
use tracing_subscriber::fmt::MakeWriter;

/// Records every call; fails the first `fail_times` calls.
#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<(String, MessageContext)>>,
    fail_times: Mutex<usize>,
}

impl RecordingHandler {
    fn failing(times: usize) -> Self {
        Self {
            fail_times: Mutex::new(times),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, MessageContext)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, ctx: &MessageContext) -> Result<(), HandlerError> {
        self.calls.lock().unwrap().push((call, ctx.clone()));
        let mut fail_times = self.fail_times.lock().unwrap();
        if *fail_times > 0 {
            *fail_times -= 1;
            return Err(HandlerError::failed("billing backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_item_added(
        &self,
        ctx: &MessageContext,
        event: &ItemAdded,
    ) -> Result<(), HandlerError> {
        self.record(format!("added:{}:{}", event.item_id, event.quantity), ctx)
    }

    async fn handle_item_removed(
        &self,
        ctx: &MessageContext,
        event: &ItemRemoved,
    ) -> Result<(), HandlerError> {
        self.record(format!("removed:{}:{}", event.item_id, event.quantity), ctx)
    }
}

/// Captures formatted log output for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Polls until `check` passes or a second has elapsed.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn spawn_subscriber<H: EventHandler>(
    broker: InMemoryBroker,
    handler: H,
) -> (Arc<EventSubscriber<InMemoryBroker, H>>, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let subscriber = Arc::new(EventSubscriber::new(broker, handler));
    let (stop, stopped) = oneshot::channel::<()>();
    let running = subscriber.clone();
    let task = tokio::spawn(async move {
        running
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    (subscriber, stop, task)
}

#[tokio::test]
async fn published_events_reach_the_handler_and_are_acked() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(broker.clone());
    let cart_id = AggregateId::new("cart-123");

    let (subscriber, stop, task) = spawn_subscriber(broker.clone(), RecordingHandler::default());

    publisher
        .publish_with_id(&CartEvent::item_added(cart_id.clone(), "item-001", 2), "cart-123:1")
        .await
        .unwrap();
    publisher
        .publish_with_id(&CartEvent::item_removed(cart_id, "item-001", 1), "cart-123:2")
        .await
        .unwrap();

    eventually(|| ready(subscriber.handler().calls().len() == 2)).await;
    stop.send(()).unwrap();
    task.await.unwrap();

    let mut calls: Vec<_> = subscriber.handler().calls().into_iter().map(|c| c.0).collect();
    calls.sort();
    assert_eq!(calls, vec!["added:item-001:2", "removed:item-001:1"]);

    let acks = broker.acknowledgements().await;
    assert_eq!(acks.len(), 2);
    assert!(acks.iter().all(|a| a.outcome == AckOutcome::Acked));
    assert!(acks.iter().all(|a| a.group == "billing-service"));
}

#[tokio::test]
async fn handler_failure_is_redelivered_until_it_succeeds() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(broker.clone());

    let (subscriber, stop, task) = spawn_subscriber(broker.clone(), RecordingHandler::failing(2));

    publisher
        .publish_with_id(
            &CartEvent::item_added(AggregateId::new("cart-1"), "item-1", 1),
            "cart-1:1",
        )
        .await
        .unwrap();

    eventually(|| ready(subscriber.handler().calls().len() == 3)).await;
    stop.send(()).unwrap();
    task.await.unwrap();

    let attempts: Vec<_> = subscriber
        .handler()
        .calls()
        .iter()
        .map(|(_, ctx)| ctx.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let outcomes: Vec<_> = broker
        .acknowledgements()
        .await
        .iter()
        .map(|a| a.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![AckOutcome::Nacked, AckOutcome::Nacked, AckOutcome::Acked]
    );
}

#[tokio::test]
async fn unknown_kind_on_the_wire_is_acked_and_logged() {
    let logs = LogBuffer::default();
    let subscriber_logs = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber_logs);

    let broker = InMemoryBroker::new();
    let (subscriber, stop, task) = spawn_subscriber(broker.clone(), RecordingHandler::default());

    // Stream is provisioned by the subscriber
    eventually(|| {
        let broker = broker.clone();
        async move { broker.has_stream("cart").await }
    })
    .await;

    broker
        .publish(
            OutboundMessage::new("cart.events", b"{\"anything\":1}".to_vec())
                .with_header(EVENT_KIND_HEADER, "CartCheckedOut"),
        )
        .await
        .unwrap();

    eventually(|| {
        let broker = broker.clone();
        async move { !broker.acknowledgements().await.is_empty() }
    })
    .await;
    stop.send(()).unwrap();
    task.await.unwrap();

    let acks = broker.acknowledgements().await;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].outcome, AckOutcome::Acked);
    assert_eq!(acks[0].event_kind.as_deref(), Some("CartCheckedOut"));
    assert!(subscriber.handler().calls().is_empty());
    assert!(logs.contents().contains("Unknown event kind"));
}

#[tokio::test]
async fn duplicate_publishes_are_handled_once_behind_dedup() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(broker.clone());
    let event = CartEvent::item_added(AggregateId::new("cart-1"), "item-1", 1);

    let (subscriber, stop, task) =
        spawn_subscriber(broker.clone(), Deduplicate::new(RecordingHandler::default()));

    publisher.publish_with_id(&event, "cart-1:1").await.unwrap();
    let ctx = MessageContext {
        message_id: Some("cart-1:1".to_string()),
        subject: "cart.events".to_string(),
        attempt: 2,
    };
    let CartEvent::ItemAdded(body) = &event else {
        unreachable!()
    };

    eventually(|| ready(subscriber.handler().inner().calls().len() == 1)).await;
    // A redelivery after a lost ack carries the same message id
    subscriber.handler().handle_item_added(&ctx, body).await.unwrap();
    stop.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(subscriber.handler().inner().calls().len(), 1);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_messages() {
    struct Slow(Arc<Mutex<bool>>);

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle_item_added(
            &self,
            _ctx: &MessageContext,
            _event: &ItemAdded,
        ) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            *self.0.lock().unwrap() = true;
            Ok(())
        }

        async fn handle_item_removed(
            &self,
            _ctx: &MessageContext,
            _event: &ItemRemoved,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(broker.clone());
    let finished = Arc::new(Mutex::new(false));
    let (_subscriber, stop, task) = spawn_subscriber(broker.clone(), Slow(finished.clone()));

    publisher
        .publish(&CartEvent::item_added(AggregateId::new("cart-1"), "item-1", 1))
        .await
        .unwrap();

    // Let the message be picked up, then stop while it is being handled
    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.send(()).unwrap();
    task.await.unwrap();

    assert!(*finished.lock().unwrap());
    assert_eq!(broker.acknowledgements().await.len(), 1);
}
