//! Transactional outbox for order events.
//!
//! Stored events are mapped to [`DomainMessage`]s and published through a
//! [`MessageBus`]:
//!
//! - [`OutboxPublisher`]: per-aggregate ordering, retry with backoff, dead
//!   letters once retries run out
//! - [`OutboxRelay`]: startup catch-up from the event log
//! - [`InMemoryMessageBus`] / [`InMemoryDeadLetterQueue`]: in-process
//!   implementations with fault injection

pub mod bus;
pub mod dead_letter;
pub mod error;
pub mod message;
pub mod publisher;
pub mod relay;
pub mod retry;

pub use bus::{InMemoryMessageBus, MessageBus, OutboundMessage};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterQueue};
pub use error::{OutboxError, PublishError, Result};
pub use message::{
    DomainMessage, ORDER_CANCELLED, ORDER_CREATED, OrderCancelledMessage, OrderCreatedMessage,
    OutboxRecord,
};
pub use publisher::{OutboxPublisher, PublishWorker};
pub use relay::OutboxRelay;
pub use retry::RetryPolicy;
