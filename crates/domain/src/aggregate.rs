//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded in an aggregate's log.
///
/// Implementations are closed enums; the stored `event_type` is derived
/// from the variant.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    fn event_type(&self) -> &'static str;
}

/// An event-sourced entity whose state is a left fold over its events.
///
/// `apply` must be pure and total: replaying the same ordered events into a
/// default instance always produces the same state, and an event that does
/// not fit the current state is ignored rather than rejected.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// `None` until the creating event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Folds a full event sequence into a fresh instance.
    fn replay(events: impl IntoIterator<Item = Self::Event>) -> Self {
        let mut aggregate = Self::default();
        aggregate.apply_events(events);
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Opened,
        Incremented(i32),
        Closed,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened => "Opened",
                CounterEvent::Incremented(_) => "Incremented",
                CounterEvent::Closed => "Closed",
            }
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        id: Option<AggregateId>,
        total: i32,
        closed: bool,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter error")]
    struct CounterError;

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened => {
                    if self.id.is_none() {
                        self.id = Some(AggregateId::from_uuid(uuid::Uuid::nil()));
                    }
                }
                CounterEvent::Incremented(by) if !self.closed => self.total += by,
                CounterEvent::Incremented(_) => {}
                CounterEvent::Closed => self.closed = true,
            }
        }
    }

    #[test]
    fn replay_is_deterministic() {
        let events = vec![
            CounterEvent::Opened,
            CounterEvent::Incremented(2),
            CounterEvent::Incremented(3),
        ];

        let first = Counter::replay(events.clone());
        let second = Counter::replay(events);
        assert_eq!(first, second);
        assert_eq!(first.total, 5);
    }

    #[test]
    fn events_after_closing_are_ignored() {
        let counter = Counter::replay(vec![
            CounterEvent::Opened,
            CounterEvent::Incremented(1),
            CounterEvent::Closed,
            CounterEvent::Incremented(10),
        ]);
        assert_eq!(counter.total, 1);
    }

    #[test]
    fn event_type_names() {
        assert_eq!(CounterEvent::Opened.event_type(), "Opened");
        assert_eq!(CounterEvent::Closed.event_type(), "Closed");
    }
}
