//! Billing consumer for cart events.
//!
//! [`BillingService`] is the [`messaging::EventHandler`] the subscriber
//! dispatches to. It only logs and counts; there is no billing computation.

pub mod config;
pub mod handler;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use handler::{BillingService, BillingStats};

/// Creates the router exposing health, handled-event stats and metrics.
pub fn create_app(billing: Arc<BillingService>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .with_state(billing)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
