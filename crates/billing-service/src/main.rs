//! Billing service entry point.

use std::sync::Arc;

use billing_service::{BillingService, Config};
use common::init_tracing;
use messaging::{Deduplicate, EventSubscriber, JetStreamBroker, StreamConfig};
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
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(config.log_format, &config.log_level);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Subscribe to cart events
    let broker = JetStreamBroker::connect(&config.nats_url)
        .await
        .expect("failed to connect to NATS");
    tracing::info!(url = %config.nats_url, "connected to NATS");

    let billing = Arc::new(BillingService::new());
    let subscriber = Arc::new(EventSubscriber::with_config(
        broker,
        Deduplicate::with_window(billing.clone(), config.dedup_window),
        StreamConfig::new(config.stream.clone(), config.subject.clone()),
        config.consumer_group.clone(),
    ));

    let (stop, mut stopped) = watch::channel(false);
    let running = subscriber.clone();
    let subscriber_task = tokio::spawn(async move {
        running
            .run_until(async move {
                let _ = stopped.changed().await;
            })
            .await
    });

    // 4. Serve health and metrics until a signal arrives
    let app = billing_service::create_app(billing, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, group = %config.consumer_group, "starting billing service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 5. Let in-flight messages finish
    let _ = stop.send(true);
    match subscriber_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "subscriber stopped with an error"),
        Err(e) => tracing::error!(error = %e, "subscriber task failed"),
    }

    tracing::info!("billing service shut down gracefully");
}
