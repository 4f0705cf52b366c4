//! Order creation and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Address, CreateOrderRequest, LineItem, Money, Order, OrderFailure, OrderStatus};
use order_store::{IdempotencyStore, OrderStore};
use saga::{InventoryService, PaymentService, SagaCoordinator, ShippingService};
use serde::Serialize;
use tracing::Instrument;

use crate::error::ApiError;

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";
/// Alternate spelling accepted for the same key.
pub const IDEMPOTENCY_HEADER_ALIAS: &str = "idempotency-key";

/// Coordinator over type-erased stores and downstream services, so the
/// same router serves in-memory and PostgreSQL/HTTP wiring.
pub type OrderCoordinator = SagaCoordinator<
    Arc<dyn OrderStore>,
    Arc<dyn IdempotencyStore>,
    Arc<dyn InventoryService>,
    Arc<dyn PaymentService>,
    Arc<dyn ShippingService>,
>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<OrderCoordinator>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub user_id: Option<String>,
    pub address: Address,
    pub currency: String,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,
    pub reservation_id: Option<String>,
    pub payment_id: Option<String>,
    pub shipment_id: Option<String>,
    pub total: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<OrderFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().map(String::from),
            address: order.address().clone(),
            currency: order.currency().code().to_string(),
            items: order.items().to_vec(),
            status: order.status(),
            reservation_id: order.reservation_id().map(String::from),
            payment_id: order.payment_id().map(String::from),
            shipment_id: order.shipment_id().map(String::from),
            total: order.total(),
            failure: order.failure().cloned(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: validate, then run the fulfillment saga to completion.
///
/// The saga runs on its own task: if the client disconnects, only the wait
/// is dropped and the order still reaches a terminal status.
#[tracing::instrument(skip(state, headers, payload), fields(idempotency_key))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let idempotency_key = idempotency_key(&headers);
    if let Some(key) = idempotency_key.as_deref() {
        tracing::Span::current().record("idempotency_key", key);
    }

    let Json(req) = payload?;
    let new_order = req.validate()?;

    let coordinator = state.coordinator.clone();
    let saga = tokio::spawn(
        async move { coordinator.create_order(new_order, idempotency_key).await }
            .instrument(tracing::Span::current()),
    );
    let order = saga
        .await
        .map_err(|e| ApiError::Internal(format!("Saga task failed: {e}")))??;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}: load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id =
        OrderId::parse(&id).map_err(|_| ApiError::NotFound(format!("Order {id} not found")))?;
    let order = state.coordinator.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// Reads the idempotency key, preferring `X-Idempotency-Key`. Blank keys
/// count as absent.
fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    [IDEMPOTENCY_HEADER, IDEMPOTENCY_HEADER_ALIAS]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(String::from)
}
