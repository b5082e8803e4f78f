use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, ExpectedVersion, SnapshotStore, validate_events_for_append},
};

/// In-memory event store.
///
/// Clones share the same backing storage, so one instance can serve many
/// concurrent scopes. Writes take the write half of the lock, which makes
/// the version check and the insert one atomic step.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    appends: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
}

impl InMemoryEventStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Number of `append` calls, successful or not.
    pub fn append_calls(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Number of stream reads (`load_stream` and `load_stream_from`).
    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn current_version(events: &[EventEnvelope], aggregate_id: AggregateId) -> Option<Version> {
        events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected: ExpectedVersion,
    ) -> Result<Version> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        validate_events_for_append(&events, expected)?;

        let aggregate_id = events[0].aggregate_id;
        let mut store = self.events.write().await;
        let current = Self::current_version(&store, aggregate_id);

        match (expected, current) {
            (ExpectedVersion::NoStream, Some(_)) => {
                tracing::debug!(%aggregate_id, "insert collided with existing stream");
                return Err(EventStoreError::DuplicateKey(aggregate_id));
            }
            (ExpectedVersion::Exact(version), current)
                if current.unwrap_or_default() != version =>
            {
                let actual = current.unwrap_or_default();
                tracing::debug!(
                    %aggregate_id,
                    expected = %version,
                    %actual,
                    "stale append rejected"
                );
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: version,
                    actual,
                });
            }
            _ => {}
        }

        let last_version = events.last().map(|e| e.version).unwrap_or_default();
        store.extend(events);
        Ok(last_version)
    }

    async fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        self.load_stream_from(aggregate_id, Version::initial()).await
    }

    async fn load_stream_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        Ok(Self::current_version(&store, aggregate_id))
    }

    async fn delete_stream(&self, aggregate_id: AggregateId) -> Result<()> {
        let mut store = self.events.write().await;
        store.retain(|e| e.aggregate_id != aggregate_id);
        Ok(())
    }

    async fn stream_all(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.events.read().await.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

/// In-memory keyed state store, usable as a state-based repository backend
/// or as the snapshot store of an event-sourced repository.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
    selects: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl InMemorySnapshotStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    /// Number of `select_by_key` calls.
    pub fn select_calls(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    /// Number of `insert` and `update` calls, successful or not.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn select_by_key(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshots.read().await.get(&aggregate_id).cloned())
    }

    async fn insert(&self, snapshot: Snapshot) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(&snapshot.aggregate_id) {
            return Err(EventStoreError::DuplicateKey(snapshot.aggregate_id));
        }
        snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn update(&self, snapshot: Snapshot, original_version: Version) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.write().await;
        let aggregate_id = snapshot.aggregate_id;
        let stored = snapshots
            .get(&aggregate_id)
            .ok_or(EventStoreError::AggregateNotFound(aggregate_id))?;

        if stored.version != original_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: original_version,
                actual: stored.version,
            });
        }

        snapshots.insert(aggregate_id, snapshot);
        Ok(())
    }

    async fn delete(&self, aggregate_id: AggregateId) -> Result<()> {
        self.snapshots.write().await.remove(&aggregate_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("User")
            .event_type("Renamed")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"version": version}))
            .try_build()
            .unwrap()
    }

    fn snapshot(aggregate_id: AggregateId, version: i64) -> Snapshot {
        Snapshot::new(
            aggregate_id,
            "User",
            Version::new(version),
            Utc::now(),
            serde_json::json!({"version": version}),
        )
    }

    #[tokio::test]
    async fn test_append_to_new_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(vec![event(id, 1), event(id, 2)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        assert_eq!(store.load_stream(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_stream_on_existing_stream_is_duplicate_key() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let result = store
            .append(vec![event(id, 1)], ExpectedVersion::NoStream)
            .await;

        assert!(matches!(result, Err(EventStoreError::DuplicateKey(dup)) if dup == id));
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1), event(id, 2)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let result = store
            .append(vec![event(id, 2)], ExpectedVersion::Exact(Version::first()))
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::first() && actual == Version::new(2)
        ));
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn test_load_from_version_is_inclusive() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(
                vec![event(id, 1), event(id, 2), event(id, 3)],
                ExpectedVersion::NoStream,
            )
            .await
            .unwrap();

        let tail = store.load_stream_from(id, Version::new(2)).await.unwrap();

        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version, Version::new(2));
        assert_eq!(store.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_stream() {
        let store = InMemoryEventStore::new();
        let kept = AggregateId::new();
        let deleted = AggregateId::new();
        store
            .append(vec![event(kept, 1)], ExpectedVersion::NoStream)
            .await
            .unwrap();
        store
            .append(vec![event(deleted, 1)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        store.delete_stream(deleted).await.unwrap();

        assert_eq!(store.stream_version(deleted).await.unwrap(), None);
        assert_eq!(store.stream_version(kept).await.unwrap(), Some(Version::first()));
    }

    #[tokio::test]
    async fn test_stream_all_yields_insertion_order() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        let first = AggregateId::new();
        let second = AggregateId::new();
        store
            .append(vec![event(first, 1)], ExpectedVersion::NoStream)
            .await
            .unwrap();
        store
            .append(vec![event(second, 1)], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let all: Vec<_> = store.stream_all().await.unwrap().collect().await;

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].as_ref().unwrap().aggregate_id, first);
        assert_eq!(all[1].as_ref().unwrap().aggregate_id, second);
    }

    #[tokio::test]
    async fn test_snapshot_insert_rejects_existing_key() {
        let store = InMemorySnapshotStore::new();
        let id = AggregateId::new();
        store.insert(snapshot(id, 1)).await.unwrap();

        let result = store.insert(snapshot(id, 1)).await;

        assert!(matches!(result, Err(EventStoreError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_snapshot_update_checks_original_version() {
        let store = InMemorySnapshotStore::new();
        let id = AggregateId::new();
        store.insert(snapshot(id, 1)).await.unwrap();

        store.update(snapshot(id, 2), Version::first()).await.unwrap();
        let stale = store.update(snapshot(id, 2), Version::first()).await;

        assert!(matches!(
            stale,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(2)
        ));
        let stored = store.select_by_key(id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(2));
        assert_eq!(store.write_calls(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_update_of_missing_key_is_not_found() {
        let store = InMemorySnapshotStore::new();
        let result = store
            .update(snapshot(AggregateId::new(), 2), Version::first())
            .await;
        assert!(matches!(result, Err(EventStoreError::AggregateNotFound(_))));
    }
}
