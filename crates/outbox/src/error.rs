//! Error types for the outbox.

use common::MailboxClosed;
use event_store::EventStoreError;
use thiserror::Error;

/// Failure reported by a [`MessageBus`](crate::MessageBus) for one send.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Outbox is shut down")]
    Closed(#[from] MailboxClosed),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
