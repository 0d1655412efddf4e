//! Inbound payment-result messages.

use common::AggregateId;
use domain::{CancelOrder, MarkPaid, UserId};
use serde::Deserialize;
use thiserror::Error;

pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Reason recorded when a failure message carries none.
pub const DEFAULT_FAILURE_REASON: &str = "Payment failed";

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("No handler for routing key '{0}'")]
    UnknownRoutingKey(String),

    #[error("Malformed payment message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Body of `payment.succeeded` and `payment.failed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMessage {
    pub order_id: AggregateId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// A decoded payment result.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Succeeded(PaymentMessage),
    Failed(PaymentMessage),
}

impl PaymentEvent {
    pub fn parse(routing_key: &str, payload: &[u8]) -> Result<Self, InboundError> {
        match routing_key {
            PAYMENT_SUCCEEDED => Ok(Self::Succeeded(serde_json::from_slice(payload)?)),
            PAYMENT_FAILED => Ok(Self::Failed(serde_json::from_slice(payload)?)),
            other => Err(InboundError::UnknownRoutingKey(other.to_string())),
        }
    }

    pub fn order_id(&self) -> AggregateId {
        match self {
            Self::Succeeded(message) | Self::Failed(message) => message.order_id,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => PAYMENT_SUCCEEDED,
            Self::Failed(_) => PAYMENT_FAILED,
        }
    }
}

impl From<PaymentMessage> for MarkPaid {
    fn from(message: PaymentMessage) -> Self {
        let command = MarkPaid::new(message.order_id).caused_by(PAYMENT_SUCCEEDED);
        match message.transaction_id {
            Some(transaction_id) => command.with_transaction(transaction_id),
            None => command,
        }
    }
}

impl From<PaymentMessage> for CancelOrder {
    fn from(message: PaymentMessage) -> Self {
        let reason = message
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
        CancelOrder::new(message.order_id, reason).caused_by(PAYMENT_FAILED)
    }
}
