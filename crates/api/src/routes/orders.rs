//! Order commands and queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, Order, OrderItem, OrderStatus, UserId};
use event_store::{EventEnvelope, EventStore};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: i64,
    pub quantity: i64,
    pub price: f64,
}

impl From<OrderItemRequest> for OrderItem {
    fn from(req: OrderItemRequest) -> Self {
        // Out-of-range quantities become 0 and fail domain validation.
        let quantity = u32::try_from(req.quantity).unwrap_or(0);
        OrderItem::new(req.product_id, quantity, req.price)
    }
}

// -- Response types --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedResponse {
    pub order_id: AggregateId,
    pub status: OrderStatus,
    pub total_amount: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: AggregateId,
    pub user_id: Option<UserId>,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

impl OrderResponse {
    pub(crate) fn from_order(id: AggregateId, order: &Order) -> Self {
        Self {
            id,
            user_id: order.user_id(),
            items: order.items().to_vec(),
            total_amount: order.total_amount().as_major(),
            status: order.status(),
            version: order.version().as_i64(),
            transaction_id: order.transaction_id().map(str::to_string),
            cancellation_reason: order.cancellation_reason().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: i64,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl From<EventEnvelope> for EventResponse {
    fn from(envelope: EventEnvelope) -> Self {
        Self {
            event_id: envelope.event_id.to_string(),
            event_type: envelope.event_type,
            version: envelope.version.as_i64(),
            recorded_at: envelope.timestamp,
            payload: envelope.payload,
            metadata: serde_json::to_value(envelope.metadata).unwrap_or_default(),
        }
    }
}

pub(crate) fn parse_order_id(id: &str) -> Result<AggregateId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid order id: {id}")))
}

// -- Handlers --

/// POST /orders: validate and store a new pending order.
#[tracing::instrument(skip(state, body))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let items = req.items.into_iter().map(OrderItem::from).collect();
    let order = state
        .controller
        .create_order(UserId::new(req.user_id), items)
        .await?;

    let order_id = order
        .id()
        .ok_or_else(|| ApiError::Internal("created order has no id".to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_id,
            status: order.status(),
            total_amount: order.total_amount().as_major(),
        }),
    ))
}

/// GET /orders/{id}: current state folded from the order's events.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .controller
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;

    Ok(Json(OrderResponse::from_order(order_id, &order)))
}

/// GET /orders/{id}/events: the order's audit trail, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let events = state.controller.order_events(order_id).await?;
    if events.is_empty() {
        return Err(ApiError::NotFound(format!("Order {order_id} not found")));
    }

    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}
