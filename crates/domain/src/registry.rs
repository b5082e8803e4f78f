//! Runtime apply table for aggregates whose event set is open.
//!
//! Aggregates with a closed event enum apply events with an exhaustive
//! `match`. When the set of event kinds grows at runtime (plugins, versioned
//! upcasters) the aggregate keeps an [`ApplyRegistry`] instead, and an event
//! kind without an entry is reported rather than silently ignored.

use std::collections::HashMap;
use std::fmt;

use crate::aggregate::DomainEvent;
use crate::error::ConfigurationError;

/// Mutates state for one event kind.
pub type ApplyFn<S, E> = fn(&mut S, &E);

/// Apply functions keyed by event type.
pub struct ApplyRegistry<S, E> {
    aggregate_type: &'static str,
    handlers: HashMap<&'static str, ApplyFn<S, E>>,
}

impl<S, E: DomainEvent> ApplyRegistry<S, E> {
    /// An empty table for `aggregate_type`.
    pub fn new(aggregate_type: &'static str) -> Self {
        Self {
            aggregate_type,
            handlers: HashMap::new(),
        }
    }

    /// Registers the apply function for `event_type`. Each kind may be
    /// registered once.
    pub fn register(
        &mut self,
        event_type: &'static str,
        apply: ApplyFn<S, E>,
    ) -> Result<(), ConfigurationError> {
        if self.handlers.contains_key(event_type) {
            return Err(ConfigurationError::DuplicateApplyHandler {
                aggregate_type: self.aggregate_type,
                event_type,
            });
        }
        self.handlers.insert(event_type, apply);
        Ok(())
    }

    /// Builder form of [`ApplyRegistry::register`].
    pub fn with(
        mut self,
        event_type: &'static str,
        apply: ApplyFn<S, E>,
    ) -> Result<Self, ConfigurationError> {
        self.register(event_type, apply)?;
        Ok(self)
    }

    /// Applies `event` to `state`, failing for an unregistered kind.
    pub fn apply(&self, state: &mut S, event: &E) -> Result<(), ConfigurationError> {
        let event_type = event.event_type();
        let apply = self
            .handlers
            .get(event_type)
            .ok_or(ConfigurationError::MissingApplyHandler {
                aggregate_type: self.aggregate_type,
                event_type,
            })?;
        apply(state, event);
        Ok(())
    }

    /// True when `event_type` has an apply function.
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S, E> fmt::Debug for ApplyRegistry<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("ApplyRegistry")
            .field("aggregate_type", &self.aggregate_type)
            .field("event_types", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented(u32),
        Reset,
    }

    impl Message for CounterEvent {}

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Incremented(_) => "Incremented",
                CounterEvent::Reset => "Reset",
            }
        }
    }

    #[derive(Default)]
    struct Counter(u32);

    fn incremented(state: &mut Counter, event: &CounterEvent) {
        if let CounterEvent::Incremented(by) = event {
            state.0 += by;
        }
    }

    #[test]
    fn test_applies_registered_kinds() {
        let registry = ApplyRegistry::new("Counter")
            .with("Incremented", incremented)
            .unwrap();
        let mut state = Counter::default();

        registry
            .apply(&mut state, &CounterEvent::Incremented(3))
            .unwrap();

        assert_eq!(state.0, 3);
        assert!(registry.is_registered("Incremented"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_second_registration_is_rejected() {
        let mut registry = ApplyRegistry::<Counter, CounterEvent>::new("Counter");
        registry.register("Incremented", incremented).unwrap();

        let err = registry.register("Incremented", incremented).unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::DuplicateApplyHandler {
                aggregate_type: "Counter",
                event_type: "Incremented",
            }
        );
    }

    #[test]
    fn test_unknown_kind_fails_loudly() {
        let registry = ApplyRegistry::new("Counter")
            .with("Incremented", incremented)
            .unwrap();
        let mut state = Counter(7);

        let err = registry.apply(&mut state, &CounterEvent::Reset).unwrap_err();

        assert!(matches!(
            err,
            ConfigurationError::MissingApplyHandler { event_type: "Reset", .. }
        ));
        assert_eq!(state.0, 7);
    }
}
