//! Event-sourced aggregate roots.
//!
//! An aggregate is split in two:
//! - an [`AggregateState`] holding the domain data and the rules that mutate
//!   it, one `apply` per event
//! - an [`AggregateRoot`] wrapping that state with its key, its version and
//!   the buffer of events published since it was loaded
//!
//! All state changes go through [`AggregateRoot::publish`] (or `replay`
//! while loading), which is the only place `apply` is called.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventStoreError, Snapshot, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::buffer::{EventBuffer, PendingEvent};
use crate::error::{BusinessRuleViolation, ConfigurationError, DomainError};
use crate::message::Message;

/// A fact that happened to an aggregate. Named in past tense.
pub trait DomainEvent: Message + Serialize + DeserializeOwned + Clone {
    /// Stable name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Something identified by an aggregate key.
pub trait Keyed {
    fn id(&self) -> AggregateId;
}

/// Something carrying a monotonically increasing version.
pub trait Versioned {
    fn version(&self) -> Version;
}

/// An aggregate whose state is derived from its events.
pub trait EventSourced: Keyed + Versioned {
    type Event: DomainEvent;

    fn aggregate_type(&self) -> &'static str;

    /// Applies an already persisted event without buffering it.
    fn replay(&mut self, event: &Self::Event) -> Result<Version, ConfigurationError>;

    fn pending_events(&self) -> &EventBuffer<Self::Event>;

    fn take_pending_events(&mut self) -> Vec<PendingEvent<Self::Event>>;
}

/// Domain data of one aggregate type.
///
/// `apply` must be deterministic and must not check business rules; events
/// are facts. Rules belong in the closures passed to
/// [`AggregateRoot::execute`], which run before anything is published.
///
/// States are `Clone` so a multi-event decision can be applied to a scratch
/// copy and committed only once every event applied.
pub trait AggregateState: Clone + Default + Send + Sync + 'static {
    type Event: DomainEvent;

    /// Business-rule failures raised by this aggregate's operations.
    type Error: std::error::Error + Send + Sync + 'static;

    fn aggregate_type() -> &'static str;

    /// Mutates the state for one event. Closed event sets match exhaustively
    /// and always succeed; open sets delegate to an
    /// [`ApplyRegistry`](crate::ApplyRegistry) and report unknown kinds.
    fn apply(&mut self, event: &Self::Event) -> Result<(), ConfigurationError>;
}

/// State that can be captured whole, either as a replay baseline or as the
/// only persisted form.
pub trait SnapshotCapable: AggregateState + Serialize + DeserializeOwned {
    /// Number of events between two snapshots.
    fn snapshot_interval() -> i64 {
        100
    }

    /// True when moving from `from` to `to` crosses a snapshot boundary.
    fn should_snapshot(from: Version, to: Version) -> bool {
        let interval = Self::snapshot_interval();
        interval > 0 && to.as_i64() / interval > from.as_i64() / interval
    }
}

/// Key, version and pending events around an [`AggregateState`].
#[derive(Debug, Clone)]
pub struct AggregateRoot<S: AggregateState> {
    id: AggregateId,
    version: Version,
    state: S,
    pending: EventBuffer<S::Event>,
}

impl<S: AggregateState> AggregateRoot<S> {
    /// A root with default state at the initial version.
    pub fn empty(id: AggregateId) -> Self {
        Self::restore(id, Version::initial(), S::default())
    }

    /// Rebuilds a root from persisted state. Nothing is pending.
    pub fn restore(id: AggregateId, version: Version, state: S) -> Self {
        Self {
            id,
            version,
            state,
            pending: EventBuffer::new(),
        }
    }

    /// Creates a new aggregate by publishing its creation event.
    pub fn create(id: AggregateId, event: S::Event) -> Result<Self, ConfigurationError> {
        let mut root = Self::empty(id);
        root.publish(event)?;
        Ok(root)
    }

    /// Creates a new aggregate from a decision that may reject the creation.
    pub fn create_with<F>(id: AggregateId, decide: F) -> Result<Self, DomainError>
    where
        F: FnOnce(&S) -> Result<Vec<S::Event>, S::Error>,
    {
        let mut root = Self::empty(id);
        root.execute(decide)?;
        Ok(root)
    }

    /// The aggregate key.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Version of the last applied event.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Read-only view of the domain data.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Applies `event`, advances the version and buffers the event.
    ///
    /// If apply fails nothing changes.
    pub fn publish(&mut self, event: S::Event) -> Result<Version, ConfigurationError> {
        self.state.apply(&event)?;
        self.version = self.version.next();
        tracing::trace!(
            aggregate_type = S::aggregate_type(),
            aggregate_id = %self.id,
            version = %self.version,
            event_type = event.event_type(),
            "event published"
        );
        self.pending.push(self.version, event);
        Ok(self.version)
    }

    /// Applies a persisted event and advances the version without buffering.
    pub fn replay(&mut self, event: &S::Event) -> Result<Version, ConfigurationError> {
        self.state.apply(event)?;
        self.version = self.version.next();
        Ok(self.version)
    }

    /// Runs a business operation.
    ///
    /// `decide` sees the current state and returns the events to publish, or
    /// a rule violation, in which case the aggregate is untouched. Returns the
    /// number of events published.
    ///
    /// The decided events are published all or none: if any of them fails to
    /// apply, state, version and pending events stay as they were.
    pub fn execute<F>(&mut self, decide: F) -> Result<usize, DomainError>
    where
        F: FnOnce(&S) -> Result<Vec<S::Event>, S::Error>,
    {
        let events = decide(&self.state)
            .map_err(|err| BusinessRuleViolation::new(S::aggregate_type(), err))?;
        let count = events.len();
        let mut scratch = self.state.clone();
        for event in &events {
            scratch.apply(event)?;
        }
        self.state = scratch;
        for event in events {
            self.version = self.version.next();
            self.pending.push(self.version, event);
        }
        tracing::trace!(
            aggregate_type = S::aggregate_type(),
            aggregate_id = %self.id,
            version = %self.version,
            events = count,
            "events published"
        );
        Ok(count)
    }

    /// Events published since the root was loaded or last flushed.
    pub fn pending_events(&self) -> &EventBuffer<S::Event> {
        &self.pending
    }

    /// True when a flush has something to write.
    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drains the pending events, oldest first.
    pub fn take_pending_events(&mut self) -> Vec<PendingEvent<S::Event>> {
        self.pending.drain()
    }
}

impl<S: SnapshotCapable> AggregateRoot<S> {
    /// Captures the full state at the current version.
    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> Result<Snapshot, serde_json::Error> {
        Snapshot::from_state(
            self.id,
            S::aggregate_type(),
            self.version,
            timestamp,
            &self.state,
        )
    }

    /// Rebuilds a root from a snapshot of the same aggregate type.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, EventStoreError> {
        if snapshot.aggregate_type != S::aggregate_type() {
            return Err(EventStoreError::TypeMismatch {
                aggregate_id: snapshot.aggregate_id,
                expected: S::aggregate_type().to_string(),
                found: snapshot.aggregate_type,
            });
        }
        let id = snapshot.aggregate_id;
        let version = snapshot.version;
        let state = snapshot.into_state()?;
        Ok(Self::restore(id, version, state))
    }
}

impl<S: AggregateState> Keyed for AggregateRoot<S> {
    fn id(&self) -> AggregateId {
        self.id
    }
}

impl<S: AggregateState> Versioned for AggregateRoot<S> {
    fn version(&self) -> Version {
        self.version
    }
}

impl<S: AggregateState> EventSourced for AggregateRoot<S> {
    type Event = S::Event;

    fn aggregate_type(&self) -> &'static str {
        S::aggregate_type()
    }

    fn replay(&mut self, event: &Self::Event) -> Result<Version, ConfigurationError> {
        AggregateRoot::replay(self, event)
    }

    fn pending_events(&self) -> &EventBuffer<Self::Event> {
        &self.pending
    }

    fn take_pending_events(&mut self) -> Vec<PendingEvent<Self::Event>> {
        self.pending.drain()
    }
}
