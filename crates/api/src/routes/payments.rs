//! Live payment status, served through the circuit breaker.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_store::EventStore;
use saga::PaymentStatusReport;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::parse_order_id;

/// GET /orders/{id}/payment-status: always 200; a fallback is a normal body.
#[tracing::instrument(skip(state))]
pub async fn status<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentStatusReport>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.prober.query_status(order_id).await))
}
