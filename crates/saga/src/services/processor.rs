//! Simulated payment subsystem for demos and end-to-end tests.
//!
//! Consumes `order.created`, settles the payment after a short delay and
//! answers with `payment.succeeded` or `payment.failed`. Totals ending in
//! `.99` are declined.

use std::time::Duration;

use chrono::Utc;
use domain::Money;
use outbox::{OrderCreatedMessage, OutboundMessage};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::dispatcher::{Acknowledgement, Delivery};
use crate::inbound::{PAYMENT_FAILED, PAYMENT_SUCCEEDED};
use crate::services::payment::{InMemoryPaymentStatusClient, PaymentRecord, PaymentStatus};

pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(500);

const MAX_REDELIVERIES: u32 = 5;
const REDELIVERY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Malformed order message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Dispatcher is not accepting deliveries")]
    DispatcherClosed,
}

#[derive(Clone)]
pub struct SimulatedPaymentProcessor {
    ledger: InMemoryPaymentStatusClient,
    deliveries: mpsc::Sender<Delivery>,
    processing_delay: Duration,
}

impl SimulatedPaymentProcessor {
    pub fn new(ledger: InMemoryPaymentStatusClient, deliveries: mpsc::Sender<Delivery>) -> Self {
        Self {
            ledger,
            deliveries,
            processing_delay: DEFAULT_PROCESSING_DELAY,
        }
    }

    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    /// Payment decision for an order total.
    pub fn decide(total: Money) -> PaymentStatus {
        if total.cents_part() == 99 {
            PaymentStatus::Failed
        } else {
            PaymentStatus::Processed
        }
    }

    /// Settles one order and reports the result to the dispatcher.
    pub async fn process(&self, message: &OutboundMessage) -> Result<Acknowledgement, ProcessorError> {
        let order: OrderCreatedMessage = serde_json::from_value(message.body.clone())?;
        tracing::info!(order_id = %order.id, "processing payment");
        tokio::time::sleep(self.processing_delay).await;

        let status = Money::round_half_even(order.total_amount)
            .map_or(PaymentStatus::Failed, Self::decide);
        let transaction_id = format!("tx-{}", Utc::now().timestamp_millis());
        self.ledger.record(
            order.id,
            PaymentRecord {
                status,
                transaction_id: transaction_id.clone(),
            },
        );
        tracing::info!(order_id = %order.id, status = status.as_str(), "payment settled");

        let (routing_key, body) = match status {
            PaymentStatus::Failed => (
                PAYMENT_FAILED,
                json!({ "orderId": order.id, "userId": order.user_id }),
            ),
            _ => (
                PAYMENT_SUCCEEDED,
                json!({ "orderId": order.id, "userId": order.user_id, "transactionId": transaction_id }),
            ),
        };
        let payload = serde_json::to_vec(&body)?;

        let mut attempt = 1;
        loop {
            let (delivery, ack) = Delivery::new(routing_key, payload.clone());
            self.deliveries
                .send(delivery)
                .await
                .map_err(|_| ProcessorError::DispatcherClosed)?;
            let ack = ack.await.map_err(|_| ProcessorError::DispatcherClosed)?;

            match ack {
                Acknowledgement::Nack { requeue: true } if attempt < MAX_REDELIVERIES => {
                    tracing::warn!(order_id = %order.id, attempt, "payment result requeued");
                    tokio::time::sleep(REDELIVERY_DELAY).await;
                    attempt += 1;
                }
                ack => return Ok(ack),
            }
        }
    }

    /// Processes every `order.created` message until the channel closes.
    pub async fn run(self, mut orders: mpsc::UnboundedReceiver<OutboundMessage>) {
        while let Some(message) = orders.recv().await {
            let processor = self.clone();
            tokio::spawn(async move {
                if let Err(e) = processor.process(&message).await {
                    tracing::error!(message_id = %message.message_id, error = %e, "payment processing failed");
                }
            });
        }
    }
}
