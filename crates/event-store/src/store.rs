use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// What the writer believes about the stream it appends to.
///
/// There is deliberately no "any version" mode: every write is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet. A collision is a duplicate key.
    NoStream,
    /// The stream must currently end at this version.
    Exact(Version),
}

impl ExpectedVersion {
    /// The version the stream is expected to end at, `initial` for a new one.
    pub fn as_version(&self) -> Version {
        match self {
            ExpectedVersion::NoStream => Version::initial(),
            ExpectedVersion::Exact(version) => *version,
        }
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Event-stream storage adapter.
///
/// Appends are atomic per call: either every event in the batch is stored or
/// none is.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for one aggregate.
    ///
    /// Fails with `DuplicateKey` when `NoStream` is expected but the stream
    /// exists, and with `ConcurrencyConflict` when the stream does not end at
    /// the expected version. Returns the version of the last stored event.
    async fn append(&self, events: Vec<EventEnvelope>, expected: ExpectedVersion)
    -> Result<Version>;

    /// All events of an aggregate in version order.
    async fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Events of an aggregate with `version >= from_version`, in version order.
    async fn load_stream_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Version of the last stored event, `None` if the stream does not exist.
    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Removes an aggregate's stream.
    async fn delete_stream(&self, aggregate_id: AggregateId) -> Result<()>;

    /// Every stored event in insertion order.
    async fn stream_all(&self) -> Result<EventStream>;
}

/// Keyed state storage adapter.
///
/// Used directly by state-based repositories and as the snapshot baseline of
/// event-sourced ones.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn select_by_key(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;

    /// Stores a new aggregate. Fails with `DuplicateKey` if the key exists.
    async fn insert(&self, snapshot: Snapshot) -> Result<()>;

    /// Replaces the stored state if it is still at `original_version`.
    /// Fails with `ConcurrencyConflict` otherwise.
    async fn update(&self, snapshot: Snapshot, original_version: Version) -> Result<()>;

    async fn delete(&self, aggregate_id: AggregateId) -> Result<()>;
}

/// Convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(
        &self,
        event: EventEnvelope,
        expected: ExpectedVersion,
    ) -> Result<Version> {
        self.append(vec![event], expected).await
    }

    async fn stream_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.stream_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate and carries gapless versions
/// that continue from `expected`.
pub fn validate_events_for_append(
    events: &[EventEnvelope],
    expected: ExpectedVersion,
) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut version = expected.as_version();
    for event in events {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "all events must have the same aggregate type".to_string(),
            ));
        }
        version = version.next();
        if event.version != version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {version}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}
