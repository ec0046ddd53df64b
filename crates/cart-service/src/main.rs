//! Cart service entry point.

use std::sync::Arc;

use cart_service::{CartService, Config, OutboxRelay};
use common::init_tracing;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use messaging::{Broker, JetStreamBroker, Publisher};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::sync::watch;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(config.log_format, &config.log_level);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Broker
    let broker = JetStreamBroker::connect(&config.nats_url)
        .await
        .expect("failed to connect to NATS");
    tracing::info!(url = %config.nats_url, "connected to NATS");

    // 4. Event store
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresEventStore::connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(config, store, broker, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, cart events are kept in memory");
            serve(config, InMemoryEventStore::new(), broker, metrics_handle).await;
        }
    }
}

async fn serve<S, B>(config: Config, store: S, broker: B, metrics_handle: PrometheusHandle)
where
    S: EventStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let publisher = Publisher::with_stream(broker, &config.stream, &config.subject);
    let service = Arc::new(CartService::new(
        store.clone(),
        publisher.clone(),
        config.retry(),
    ));

    // Outbox relay runs until the HTTP server has drained
    let (stop_relay, mut relay_stopped) = watch::channel(false);
    let relay = OutboxRelay::new(store, publisher);
    let interval = config.outbox_interval;
    let relay_task = tokio::spawn(async move {
        relay
            .run_until(interval, async move {
                let _ = relay_stopped.changed().await;
            })
            .await;
    });

    let app = cart_service::create_app(service, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, stream = %config.stream, subject = %config.subject, "starting cart service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = stop_relay.send(true);
    if let Err(e) = relay_task.await {
        tracing::error!(error = %e, "outbox relay task failed");
    }

    tracing::info!("server shut down gracefully");
}
