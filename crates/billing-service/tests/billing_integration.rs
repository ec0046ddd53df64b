//! Billing service wired to the in-memory broker, plus its HTTP surface.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use billing_service::{BillingService, BillingStats};
use common::AggregateId;
use domain::CartEvent;
use messaging::{
    AckOutcome, Broker, Deduplicate, EventSubscriber, InMemoryBroker, OutboundMessage, Publisher,
    StreamConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::oneshot;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type Subscriber = EventSubscriber<InMemoryBroker, Deduplicate<Arc<BillingService>>>;

fn spawn_billing(
    broker: InMemoryBroker,
    billing: Arc<BillingService>,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let subscriber: Arc<Subscriber> = Arc::new(EventSubscriber::with_config(
        broker,
        Deduplicate::new(billing),
        StreamConfig::new("cart", "cart.events"),
        "billing-service",
    ));
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        subscriber
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    (stop, task)
}

async fn wait_for_stats(billing: &BillingService, expected: BillingStats) {
    for _ in 0..100 {
        if billing.stats() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stats never reached {expected:?}, got {:?}", billing.stats());
}

#[tokio::test]
async fn billing_counts_published_cart_events() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::new(broker.clone());
    let billing = Arc::new(BillingService::new());
    let cart_id = AggregateId::new("cart-123");

    let (stop, task) = spawn_billing(broker.clone(), billing.clone());

    publisher
        .publish_with_id(&CartEvent::item_added(cart_id.clone(), "item-001", 2), "cart-123:1")
        .await
        .unwrap();
    publisher
        .publish_with_id(&CartEvent::item_removed(cart_id, "item-001", 1), "cart-123:2")
        .await
        .unwrap();

    wait_for_stats(
        &billing,
        BillingStats {
            items_added: 1,
            items_removed: 1,
            units_added: 2,
            units_removed: 1,
        },
    )
    .await;

    stop.send(()).unwrap();
    task.await.unwrap();

    let acks = broker.acknowledgements().await;
    assert_eq!(acks.len(), 2);
    assert!(acks.iter().all(|a| a.outcome == AckOutcome::Acked));
}

#[tokio::test]
async fn unknown_kinds_are_acked_without_billing() {
    let broker = InMemoryBroker::new();
    broker
        .ensure_stream(&StreamConfig::new("cart", "cart.events"))
        .await
        .unwrap();
    let billing = Arc::new(BillingService::new());

    let (stop, task) = spawn_billing(broker.clone(), billing.clone());

    broker
        .publish(
            OutboundMessage::new("cart.events", br#"{"cart_id":"cart-123"}"#.to_vec())
                .with_header("event_kind", "CartCheckedOut"),
        )
        .await
        .unwrap();

    for _ in 0..100 {
        if !broker.acknowledgements().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stop.send(()).unwrap();
    task.await.unwrap();

    let acks = broker.acknowledgements().await;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].outcome, AckOutcome::Acked);
    assert_eq!(billing.stats(), BillingStats::default());
}

#[tokio::test]
async fn health_and_stats_endpoints() {
    let billing = Arc::new(BillingService::new());
    let app = billing_service::create_app(billing, get_metrics_handle());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "billing-service");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["items_added"], 0);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
