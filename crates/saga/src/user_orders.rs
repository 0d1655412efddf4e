//! Read model mapping each user to the orders they placed.
//!
//! Fed by the controller as orders are created and rebuilt from the log at
//! startup. Order state itself is always folded from the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::AggregateId;
use domain::{OrderEvent, UserId};
use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Default)]
struct IndexState {
    /// Oldest first.
    by_user: HashMap<UserId, Vec<AggregateId>>,
    known: HashSet<AggregateId>,
}

#[derive(Debug, Clone, Default)]
pub struct UserOrdersIndex {
    state: Arc<RwLock<IndexState>>,
}

impl UserOrdersIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an order to its user's list. Returns false if it was already
    /// indexed.
    pub async fn record(&self, user_id: UserId, order_id: AggregateId) -> bool {
        let mut state = self.state.write().await;
        if !state.known.insert(order_id) {
            return false;
        }
        state.by_user.entry(user_id).or_default().push(order_id);
        true
    }

    /// The user's order ids, newest first.
    pub async fn orders_for(&self, user_id: UserId) -> Vec<AggregateId> {
        self.state
            .read()
            .await
            .by_user
            .get(&user_id)
            .map(|ids| ids.iter().rev().copied().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.known.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Indexes a stored event. Only Created events carry the user.
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<bool> {
        if envelope.event_type != "Created" {
            return Ok(false);
        }
        match envelope.decode::<OrderEvent>()? {
            OrderEvent::Created(data) => Ok(self.record(data.user_id, envelope.aggregate_id).await),
            _ => Ok(false),
        }
    }

    /// Streams the whole log and indexes every order in it.
    ///
    /// Returns the number of orders newly indexed.
    pub async fn rebuild<S: EventStore>(&self, store: &S) -> Result<usize> {
        let mut stream = store.stream_all_events().await?;
        let mut added = 0;
        while let Some(envelope) = stream.next().await {
            if self.apply(&envelope?).await? {
                added += 1;
            }
        }

        tracing::info!(orders_indexed = added, "user order index rebuilt");
        Ok(added)
    }
}
