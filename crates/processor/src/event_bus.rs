//! Scope-local queue of events persisted by a flush.

use domain::DomainEvent;
use event_store::EventEnvelope;

use crate::envelope::MessageEnvelope;

/// An event after its aggregate was written: the stored record plus the
/// typed event for routing to event handlers.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub record: EventEnvelope,
    pub message: MessageEnvelope,
}

impl PublishedEvent {
    /// Pairs a stored record with its typed event.
    pub fn new<E: DomainEvent>(record: EventEnvelope, event: E) -> Self {
        Self {
            record,
            message: MessageEnvelope::new(event),
        }
    }
}

/// Events waiting to be dispatched, in flush order.
///
/// Handlers only read the bus; events enter it exclusively through
/// repository flushes.
#[derive(Debug, Default)]
pub struct EventBus {
    queue: Vec<PublishedEvent>,
    total: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `event` for the next cascade round.
    pub fn publish(&mut self, event: PublishedEvent) {
        self.queue.push(event);
        self.total += 1;
    }

    /// Events published and not yet dispatched.
    pub fn pending(&self) -> &[PublishedEvent] {
        &self.queue
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of events published over the bus's lifetime.
    pub fn total_published(&self) -> usize {
        self.total
    }

    pub(crate) fn drain(&mut self) -> Vec<PublishedEvent> {
        std::mem::take(&mut self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use domain::Message;
    use event_store::Version;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Pinged(u32);

    impl Message for Pinged {}

    impl DomainEvent for Pinged {
        fn event_type(&self) -> &'static str {
            "Pinged"
        }
    }

    fn published(n: u32) -> PublishedEvent {
        let record = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Pinger")
            .event_type("Pinged")
            .version(Version::new(n as i64))
            .payload(&Pinged(n))
            .unwrap()
            .try_build()
            .unwrap();
        PublishedEvent::new(record, Pinged(n))
    }

    #[test]
    fn test_drains_in_publication_order() {
        let mut bus = EventBus::new();
        bus.publish(published(1));
        bus.publish(published(2));

        let drained = bus.drain();

        let values: Vec<_> = drained
            .iter()
            .map(|p| p.message.downcast_ref::<Pinged>().unwrap().0)
            .collect();
        assert_eq!(values, [1, 2]);
        assert!(bus.is_empty());
        assert_eq!(bus.total_published(), 2);
    }
}
