//! Cart command and query endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::AggregateId;
use domain::{CommandResult, DomainError, ShoppingCart};
use event_store::EventStore;
use messaging::Broker;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, CartServiceError};
use crate::service::CartService;

type AppState<S, B> = Arc<CartService<S, B>>;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub item_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemQuery {
    pub quantity: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub cart_id: String,
    pub version: i64,
    pub items: BTreeMap<String, i64>,
    pub item_count: usize,
    pub total_quantity: i64,
}

impl CartResponse {
    fn from_cart(cart: &ShoppingCart) -> Self {
        use domain::Aggregate;

        Self {
            cart_id: cart.id().to_string(),
            version: cart.version().as_i64(),
            items: cart
                .items()
                .iter()
                .map(|(item, quantity)| (item.clone(), *quantity))
                .collect(),
            item_count: cart.item_count(),
            total_quantity: cart.total_quantity(),
        }
    }
}

/// Reply to a cart command.
///
/// `published` is false when the events are stored but the broker did not
/// take them yet; the cart is left out then.
#[derive(Serialize)]
pub struct CommandResponse {
    pub cart_id: String,
    pub version: i64,
    pub published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart: Option<CartResponse>,
}

#[derive(Serialize)]
pub struct CartCreatedResponse {
    pub cart_id: String,
}

#[derive(Serialize)]
pub struct EventRecordResponse {
    pub sequence: i64,
    pub version: i64,
    pub event_kind: String,
    pub timestamp: String,
    pub published: bool,
    pub payload: serde_json::Value,
}

// -- Handlers --

/// POST /carts: hands out a fresh cart id. Nothing is stored until the
/// first item is added.
pub async fn create() -> (StatusCode, Json<CartCreatedResponse>) {
    let cart_id = AggregateId::generate("cart");
    tracing::debug!(%cart_id, "Issued cart id");
    (
        StatusCode::CREATED,
        Json(CartCreatedResponse {
            cart_id: cart_id.to_string(),
        }),
    )
}

/// GET /carts/:id: the replayed cart.
#[tracing::instrument(skip(state))]
pub async fn get<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<String>,
) -> Result<Json<CartResponse>, ApiError>
where
    S: EventStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let cart_id = parse_cart_id(&id)?;
    let cart = state
        .get_cart(&cart_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Cart {id} not found")))?;

    Ok(Json(CartResponse::from_cart(&cart)))
}

/// GET /carts/:id/events: the cart's raw event log, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventRecordResponse>>, ApiError>
where
    S: EventStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let cart_id = parse_cart_id(&id)?;
    let records = state
        .store()
        .load(&cart_id)
        .await
        .map_err(|e| CartServiceError::from(DomainError::from(e)))?;

    if records.is_empty() {
        return Err(ApiError::NotFound(format!("Cart {id} not found")));
    }

    let responses = records
        .into_iter()
        .map(|record| {
            let payload = serde_json::from_slice(&record.payload)
                .map_err(|e| ApiError::Internal(format!("record {}: {e}", record.message_id())))?;
            Ok(EventRecordResponse {
                sequence: record.sequence.as_i64(),
                version: record.version.as_i64(),
                timestamp: record.timestamp.to_rfc3339(),
                published: record.is_published(),
                event_kind: record.event_kind,
                payload,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(responses))
}

/// POST /carts/:id/items: add units of an item.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S, B>(
    State(state): State<AppState<S, B>>,
    Path(id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError>
where
    S: EventStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let cart_id = parse_cart_id(&id)?;
    let result = state.add_item(&cart_id, &req.item_id, req.quantity).await;
    command_response(&cart_id, result)
}

/// DELETE /carts/:id/items/:item_id?quantity=n: remove units of an item
/// (one unit when `quantity` is absent).
#[tracing::instrument(skip(state))]
pub async fn remove_item<S, B>(
    State(state): State<AppState<S, B>>,
    Path((id, item_id)): Path<(String, String)>,
    Query(query): Query<RemoveItemQuery>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError>
where
    S: EventStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let cart_id = parse_cart_id(&id)?;
    let quantity = query.quantity.unwrap_or(1);
    let result = state.remove_item(&cart_id, &item_id, quantity).await;
    command_response(&cart_id, result)
}

fn command_response(
    cart_id: &AggregateId,
    result: Result<CommandResult<ShoppingCart>, CartServiceError>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    match result {
        Ok(result) => Ok((
            StatusCode::OK,
            Json(CommandResponse {
                cart_id: cart_id.to_string(),
                version: result.new_version.as_i64(),
                published: true,
                cart: Some(CartResponse::from_cart(&result.aggregate)),
            }),
        )),
        Err(e) => {
            let Some(version) = e.stored_version() else {
                return Err(e.into());
            };
            tracing::warn!(%cart_id, %version, error = %e, "Command stored, publish deferred");
            Ok((
                StatusCode::ACCEPTED,
                Json(CommandResponse {
                    cart_id: cart_id.to_string(),
                    version: version.as_i64(),
                    published: false,
                    cart: None,
                }),
            ))
        }
    }
}

fn parse_cart_id(id: &str) -> Result<AggregateId, ApiError> {
    let cart_id = AggregateId::new(id.trim());
    if cart_id.is_blank() {
        return Err(ApiError::BadRequest("Cart id must not be blank".to_string()));
    }
    Ok(cart_id)
}
