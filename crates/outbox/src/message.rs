//! Outbound domain messages and the records that carry them.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Money, OrderEvent, OrderItem, UserId};
use event_store::{EventEnvelope, EventId, Version};
use serde::{Deserialize, Serialize};

use crate::Result;

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_CANCELLED: &str = "order.cancelled";

/// Body of an `order.created` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedMessage {
    pub id: AggregateId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Body of an `order.cancelled` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelledMessage {
    pub id: AggregateId,
    pub total_amount: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A message other services consume. The routing key names the kind, so
/// the body carries no tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainMessage {
    OrderCreated(OrderCreatedMessage),
    OrderCancelled(OrderCancelledMessage),
}

impl DomainMessage {
    pub fn routing_key(&self) -> &'static str {
        match self {
            DomainMessage::OrderCreated(_) => ORDER_CREATED,
            DomainMessage::OrderCancelled(_) => ORDER_CANCELLED,
        }
    }

    /// Maps a stored order event to the message it announces.
    ///
    /// `Paid` has no outbound message. The cancelled message needs the
    /// order total, which only the Created event carries, so it is passed
    /// in by the caller when known.
    pub fn from_event(
        order_id: AggregateId,
        event: OrderEvent,
        total: Option<Money>,
    ) -> Option<Self> {
        match event {
            OrderEvent::Created(data) => Some(DomainMessage::OrderCreated(OrderCreatedMessage {
                id: order_id,
                user_id: data.user_id,
                items: data.items,
                total_amount: data.total_amount.as_major(),
                timestamp: data.created_at,
            })),
            OrderEvent::Cancelled(data) => {
                Some(DomainMessage::OrderCancelled(OrderCancelledMessage {
                    id: order_id,
                    total_amount: total.map(|t| t.as_major()).unwrap_or_default(),
                    reason: data.reason,
                    timestamp: data.cancelled_at,
                }))
            }
            OrderEvent::Paid(_) => None,
        }
    }
}

/// A stored event queued for publication.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Id of the source event; doubles as the message id for consumer dedupe.
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub routing_key: &'static str,
    pub message: DomainMessage,
}

impl OutboxRecord {
    pub fn new(envelope: &EventEnvelope, message: DomainMessage) -> Self {
        Self {
            event_id: envelope.event_id,
            aggregate_id: envelope.aggregate_id,
            version: envelope.version,
            routing_key: message.routing_key(),
            message,
        }
    }

    /// Derives the records for one aggregate's envelopes, in order.
    ///
    /// `history` is the aggregate's events up to and including `envelopes`;
    /// it supplies the order total for cancellation messages.
    pub fn from_envelopes(history: &[EventEnvelope], envelopes: &[EventEnvelope]) -> Result<Vec<Self>> {
        let total = history
            .iter()
            .find(|e| e.event_type == "Created")
            .map(|e| e.decode::<OrderEvent>())
            .transpose()?
            .and_then(|event| match event {
                OrderEvent::Created(data) => Some(data.total_amount),
                _ => None,
            });

        Self::for_order(total, envelopes)
    }

    /// Like [`OutboxRecord::from_envelopes`] with the order total already known.
    pub fn for_order(total: Option<Money>, envelopes: &[EventEnvelope]) -> Result<Vec<Self>> {
        let mut records = Vec::new();
        for envelope in envelopes {
            let event: OrderEvent = envelope.decode()?;
            if let Some(message) = DomainMessage::from_event(envelope.aggregate_id, event, total) {
                records.push(Self::new(envelope, message));
            }
        }
        Ok(records)
    }

    pub fn body(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.message)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DomainEvent;

    fn envelope(order_id: AggregateId, version: i64, event: &OrderEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    fn history(order_id: AggregateId) -> Vec<EventEnvelope> {
        vec![
            envelope(
                order_id,
                1,
                &OrderEvent::created(
                    order_id,
                    UserId::new(1),
                    vec![OrderItem::new(1, 2, 10.0)],
                    Money::from_cents(2000),
                ),
            ),
            envelope(order_id, 2, &OrderEvent::paid(None)),
        ]
    }

    #[test]
    fn created_maps_to_order_created() {
        let order_id = AggregateId::new();
        let history = history(order_id);

        let records = OutboxRecord::from_envelopes(&history, &history[..1]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].routing_key, ORDER_CREATED);
        assert_eq!(records[0].version, Version::first());

        let body = records[0].body().unwrap();
        assert_eq!(body["id"], order_id.to_string());
        assert_eq!(body["userId"], 1);
        assert_eq!(body["totalAmount"], 20.0);
        assert_eq!(body["items"][0]["quantity"], 2);
    }

    #[test]
    fn paid_is_not_published() {
        let order_id = AggregateId::new();
        let history = history(order_id);

        let records = OutboxRecord::from_envelopes(&history, &history[1..]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn cancelled_carries_total_and_reason() {
        let order_id = AggregateId::new();
        let mut history = history(order_id);
        history.truncate(1);
        history.push(envelope(order_id, 2, &OrderEvent::cancelled("Payment failed")));

        let records = OutboxRecord::from_envelopes(&history, &history[1..]).unwrap();
        assert_eq!(records[0].routing_key, ORDER_CANCELLED);

        let body = records[0].body().unwrap();
        assert_eq!(body["totalAmount"], 20.0);
        assert_eq!(body["reason"], "Payment failed");
    }
}
