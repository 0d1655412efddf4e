//! Orders placed by one user.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Aggregate, UserId};
use event_store::EventStore;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::OrderResponse;

#[derive(Debug, Serialize)]
pub struct UserOrdersResponse {
    pub orders: Vec<OrderResponse>,
}

/// GET /users/{id}/orders: newest first, empty for a user with no orders.
#[tracing::instrument(skip(state))]
pub async fn orders<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<UserOrdersResponse>, ApiError> {
    let user_id: i64 = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user id: {id}")))?;

    let orders: Vec<_> = state
        .controller
        .orders_for_user(UserId::new(user_id))
        .await?
        .iter()
        .filter_map(|order| order.id().map(|id| OrderResponse::from_order(id, order)))
        .collect();
    tracing::info!(user_id, count = orders.len(), "orders retrieved");

    Ok(Json(UserOrdersResponse { orders }))
}
