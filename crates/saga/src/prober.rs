//! Payment status queries guarded by a circuit breaker.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{BreakerConfig, BreakerError, CircuitBreaker};
use crate::services::payment::{PaymentRecord, PaymentStatusClient};

pub const FALLBACK_STATUS: &str = "unknown";
pub const FALLBACK_TRANSACTION_ID: &str = "N/A";

/// Answer to a payment status query. A fallback is a normal answer, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusReport {
    pub status: String,
    pub transaction_id: String,
    pub is_fallback: bool,
}

impl PaymentStatusReport {
    pub fn fallback() -> Self {
        Self {
            status: FALLBACK_STATUS.to_string(),
            transaction_id: FALLBACK_TRANSACTION_ID.to_string(),
            is_fallback: true,
        }
    }
}

impl From<PaymentRecord> for PaymentStatusReport {
    fn from(record: PaymentRecord) -> Self {
        Self {
            status: record.status.as_str().to_string(),
            transaction_id: record.transaction_id,
            is_fallback: false,
        }
    }
}

/// Queries payment status without letting a slow or failing payment
/// service stall the caller for longer than the call timeout.
pub struct PaymentStatusProber<C> {
    client: C,
    breaker: CircuitBreaker,
}

impl<C: PaymentStatusClient> PaymentStatusProber<C> {
    pub fn new(client: C, config: BreakerConfig) -> Self {
        Self {
            client,
            breaker: CircuitBreaker::new("payment-status", config),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    #[tracing::instrument(skip(self))]
    pub async fn query_status(&self, order_id: AggregateId) -> PaymentStatusReport {
        match self
            .breaker
            .call(|| self.client.payment_status(order_id))
            .await
        {
            Ok(record) => record.into(),
            Err(e) => {
                match &e {
                    BreakerError::Open => {
                        tracing::debug!(%order_id, "breaker open, serving fallback")
                    }
                    _ => tracing::warn!(%order_id, error = %e, "payment status unavailable, serving fallback"),
                }
                metrics::counter!("payment_status_fallbacks_total").increment(1);
                PaymentStatusReport::fallback()
            }
        }
    }
}
