//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::Serialize;

use crate::{AppState, SERVICE_NAME};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// State of the payment-status circuit breaker.
    pub payment_breaker: &'static str,
}

/// GET /health
pub async fn check<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        service: SERVICE_NAME,
        payment_breaker: state.prober.breaker().state().as_str(),
    })
}
