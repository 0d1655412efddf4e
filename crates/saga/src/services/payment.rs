//! Payment status lookups against the payment subsystem.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processed => "processed",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// What the payment subsystem knows about one order's payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub status: PaymentStatus,
    /// Empty while the payment is pending.
    pub transaction_id: String,
}

impl PaymentRecord {
    pub fn pending() -> Self {
        Self {
            status: PaymentStatus::Pending,
            transaction_id: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentClientError {
    #[error("Payment service unavailable: {0}")]
    Unavailable(String),
}

/// Remote lookup of payment status.
#[async_trait]
pub trait PaymentStatusClient: Send + Sync + 'static {
    /// Status for the order. Unknown orders are reported as pending.
    async fn payment_status(&self, order_id: AggregateId)
    -> Result<PaymentRecord, PaymentClientError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    payments: HashMap<AggregateId, PaymentRecord>,
    delay: Duration,
    slow_orders: HashMap<AggregateId, Duration>,
    fail: bool,
    calls: usize,
}

/// In-memory payments ledger with injectable latency and failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStatusClient {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryPaymentStatusClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the payment for an order.
    pub fn record(&self, order_id: AggregateId, record: PaymentRecord) {
        self.write().payments.insert(order_id, record);
    }

    /// Delay applied to every lookup.
    pub fn set_delay(&self, delay: Duration) {
        self.write().delay = delay;
    }

    /// Delay applied to lookups for one order, overriding the global one.
    pub fn set_delay_for(&self, order_id: AggregateId, delay: Duration) {
        self.write().slow_orders.insert(order_id, delay);
    }

    pub fn set_fail(&self, fail: bool) {
        self.write().fail = fail;
    }

    /// Number of lookups that reached this client.
    pub fn calls(&self) -> usize {
        self.read().calls
    }
}

#[async_trait]
impl PaymentStatusClient for InMemoryPaymentStatusClient {
    async fn payment_status(
        &self,
        order_id: AggregateId,
    ) -> Result<PaymentRecord, PaymentClientError> {
        let delay = {
            let mut state = self.write();
            state.calls += 1;
            state.slow_orders.get(&order_id).copied().unwrap_or(state.delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.read();
        if state.fail {
            return Err(PaymentClientError::Unavailable("database error".to_string()));
        }
        Ok(state
            .payments
            .get(&order_id)
            .cloned()
            .unwrap_or_else(PaymentRecord::pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_order_is_pending() {
        let client = InMemoryPaymentStatusClient::new();
        let record = client.payment_status(AggregateId::new()).await.unwrap();
        assert_eq!(record, PaymentRecord::pending());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn recorded_payment_is_returned() {
        let client = InMemoryPaymentStatusClient::new();
        let order_id = AggregateId::new();
        client.record(
            order_id,
            PaymentRecord {
                status: PaymentStatus::Processed,
                transaction_id: "tx-1".to_string(),
            },
        );

        let record = client.payment_status(order_id).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Processed);
        assert_eq!(record.transaction_id, "tx-1");
    }

    #[tokio::test]
    async fn failure_injection() {
        let client = InMemoryPaymentStatusClient::new();
        client.set_fail(true);
        assert!(client.payment_status(AggregateId::new()).await.is_err());
    }

    #[tokio::test]
    async fn writes_survive_a_poisoned_lock() {
        let client = InMemoryPaymentStatusClient::new();
        let poisoner = client.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.write().unwrap();
            panic!("poison the ledger");
        })
        .join();
        assert!(client.state.is_poisoned());

        let order_id = AggregateId::new();
        client.record(
            order_id,
            PaymentRecord {
                status: PaymentStatus::Failed,
                transaction_id: "tx-2".to_string(),
            },
        );

        let record = client.payment_status(order_id).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Failed);
        assert_eq!(client.calls(), 1);
    }
}
