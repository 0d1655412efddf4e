//! Message bus abstraction and an in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::PublishError;

/// A message as handed to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Stable across retries and replays so consumers can dedupe.
    pub message_id: String,
    pub routing_key: String,
    pub body: Value,
}

/// Sends messages to a topic-routed broker.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn send(&self, message: &OutboundMessage) -> Result<(), PublishError>;
}

#[derive(Default)]
struct BusState {
    delivered: Vec<OutboundMessage>,
    attempts: usize,
    fail_next: usize,
    unavailable: bool,
    subscribers: Vec<(String, mpsc::UnboundedSender<OutboundMessage>)>,
}

/// In-process bus with fault injection.
///
/// Delivered messages are recorded and forwarded to subscribers of their
/// routing key.
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<RwLock<BusState>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sends fail.
    pub fn fail_next(&self, count: usize) {
        if let Ok(mut state) = self.state.write() {
            state.fail_next = count;
        }
    }

    /// Makes every send fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.unavailable = unavailable;
        }
    }

    /// Receives every message later delivered with `routing_key`.
    pub fn subscribe(&self, routing_key: impl Into<String>) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.state.write() {
            state.subscribers.push((routing_key.into(), tx));
        }
        rx
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.state
            .read()
            .map(|s| s.delivered.clone())
            .unwrap_or_default()
    }

    /// Number of sends tried, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.read().map(|s| s.attempts).unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn send(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| PublishError::Unavailable("bus state poisoned".to_string()))?;
        state.attempts += 1;

        if state.unavailable {
            return Err(PublishError::Unavailable("broker is down".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(PublishError::Unavailable("injected failure".to_string()));
        }

        state.delivered.push(message.clone());
        state.subscribers.retain(|(key, tx)| {
            key != &message.routing_key || tx.send(message.clone()).is_ok()
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(key: &str) -> OutboundMessage {
        OutboundMessage {
            message_id: "m-1".to_string(),
            routing_key: key.to_string(),
            body: json!({"id": 1}),
        }
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let bus = InMemoryMessageBus::new();
        bus.fail_next(2);

        assert!(bus.send(&message("order.created")).await.is_err());
        assert!(bus.send(&message("order.created")).await.is_err());
        assert!(bus.send(&message("order.created")).await.is_ok());

        assert_eq!(bus.attempts(), 3);
        assert_eq!(bus.delivered().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_matching_keys() {
        let bus = InMemoryMessageBus::new();
        let mut created = bus.subscribe("order.created");

        bus.send(&message("order.cancelled")).await.unwrap();
        bus.send(&message("order.created")).await.unwrap();

        let received = created.recv().await.unwrap();
        assert_eq!(received.routing_key, "order.created");
        assert!(created.try_recv().is_err());
    }
}
