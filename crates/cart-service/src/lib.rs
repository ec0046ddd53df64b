//! Cart command service.
//!
//! Runs cart commands through the event-sourced pipeline (load, replay,
//! validate, append, publish) and exposes them over HTTP. An outbox relay
//! republishes anything that was persisted but never reached the broker.

pub mod config;
pub mod error;
pub mod locks;
pub mod outbox;
pub mod retry;
pub mod routes;
pub mod service;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use event_store::EventStore;
use messaging::Broker;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::{CartServiceError, OutboxError};
pub use outbox::{OutboxRelay, RelayReport};
pub use retry::RetryConfig;
pub use service::CartService;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, B>(service: Arc<CartService<S, B>>, metrics_handle: PrometheusHandle) -> Router
where
    S: EventStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/carts", post(routes::carts::create))
        .route("/carts/{id}", get(routes::carts::get::<S, B>))
        .route("/carts/{id}/events", get(routes::carts::events::<S, B>))
        .route("/carts/{id}/items", post(routes::carts::add_item::<S, B>))
        .route(
            "/carts/{id}/items/{item_id}",
            delete(routes::carts::remove_item::<S, B>),
        )
        .with_state(service)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
