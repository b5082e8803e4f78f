//! Repositories: load, track and persist aggregates of one type.
//!
//! A repository lives for one unit of work. Every aggregate it hands out or
//! is given is tracked, so asking twice for the same key returns the same
//! instance without reading storage again, and each tracked aggregate is
//! written at most once per flush.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{AggregateRoot, AggregateState, DomainEvent, SnapshotCapable};
use event_store::{
    EventEnvelope, EventStore, EventStoreError, ExpectedVersion, SnapshotStore, Version,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{ProcessingError, Result};
use crate::event_bus::PublishedEvent;
use crate::telemetry;
use crate::unit_of_work::{FlushContext, Flushable};

/// Shared handle to a tracked aggregate.
pub type Tracked<S> = Arc<Mutex<AggregateRoot<S>>>;

/// Where and how a repository persists its aggregates.
#[derive(Clone)]
pub enum Persistence {
    /// Aggregates are their event streams. With a snapshot store, full state
    /// is captured every `snapshot_interval()` events and used as the replay
    /// baseline.
    EventSourced {
        events: Arc<dyn EventStore>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    },
    /// Only the latest full state is stored.
    StateBased { states: Arc<dyn SnapshotStore> },
}

impl Persistence {
    /// Appends events to `events`.
    pub fn event_sourced(events: Arc<dyn EventStore>) -> Self {
        Persistence::EventSourced {
            events,
            snapshots: None,
        }
    }

    /// Writes whole state to `states`.
    pub fn state_based(states: Arc<dyn SnapshotStore>) -> Self {
        Persistence::StateBased { states }
    }

    /// Adds a snapshot store to event-sourced persistence.
    pub fn with_snapshots(self, store: Arc<dyn SnapshotStore>) -> Self {
        match self {
            Persistence::EventSourced { events, .. } => Persistence::EventSourced {
                events,
                snapshots: Some(store),
            },
            state_based => state_based,
        }
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persistence::EventSourced { snapshots, .. } => f
                .debug_struct("EventSourced")
                .field("snapshots", &snapshots.is_some())
                .finish(),
            Persistence::StateBased { .. } => f.write_str("StateBased"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// Not persisted yet; flushed as an insert.
    Added,
    /// Persisted at `original_version` when loaded or last flushed.
    Loaded { original_version: Version },
    /// Deleted on the next flush.
    Removed,
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Insert,
    Update(Version),
}

impl WriteMode {
    fn previous_version(&self) -> Version {
        match self {
            WriteMode::Insert => Version::initial(),
            WriteMode::Update(version) => *version,
        }
    }
}

struct Entry<S: AggregateState> {
    handle: Tracked<S>,
    status: Status,
    snapshot_version: Option<Version>,
}

struct Tracking<S: AggregateState> {
    entries: HashMap<AggregateId, Entry<S>>,
    order: Vec<AggregateId>,
}

impl<S: AggregateState> Default for Tracking<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<S: AggregateState> Tracking<S> {
    fn track(&mut self, id: AggregateId, entry: Entry<S>) {
        self.entries.insert(id, entry);
        self.order.push(id);
    }

    fn forget(&mut self, id: AggregateId) {
        self.entries.remove(&id);
        self.order.retain(|tracked| *tracked != id);
    }
}

/// Repository for aggregates with state `S`.
pub struct Repository<S: SnapshotCapable> {
    persistence: Persistence,
    tracking: Mutex<Tracking<S>>,
    cancellation: CancellationToken,
}

impl<S: SnapshotCapable> Repository<S> {
    /// An empty repository over `persistence`.
    pub fn new(persistence: Persistence) -> Self {
        Self {
            persistence,
            tracking: Mutex::new(Tracking::default()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Storage calls fail with `Cancelled` once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Where flushed changes go.
    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Returns the aggregate with key `id`, or `None` if it does not exist
    /// or was removed in this unit of work.
    #[tracing::instrument(skip(self), fields(aggregate_type = S::aggregate_type()))]
    pub async fn get_by_key(&self, id: AggregateId) -> Result<Option<Tracked<S>>> {
        let mut tracking = self.tracking.lock().await;
        if let Some(entry) = tracking.entries.get(&id) {
            return Ok(match entry.status {
                Status::Removed => None,
                _ => Some(Arc::clone(&entry.handle)),
            });
        }

        let Some((root, snapshot_version)) = self.read(id).await? else {
            return Ok(None);
        };
        let original_version = root.version();
        tracing::debug!(%original_version, "aggregate loaded");

        let handle = Arc::new(Mutex::new(root));
        tracking.track(
            id,
            Entry {
                handle: Arc::clone(&handle),
                status: Status::Loaded { original_version },
                snapshot_version,
            },
        );
        Ok(Some(handle))
    }

    /// Like [`Repository::get_by_key`], failing with `NotFound` on a miss.
    pub async fn load(&self, id: AggregateId) -> Result<Tracked<S>> {
        self.get_by_key(id)
            .await?
            .ok_or(ProcessingError::NotFound {
                aggregate_type: S::aggregate_type(),
                aggregate_id: id,
            })
    }

    /// Tracks a new aggregate; it is inserted on the next flush.
    pub async fn add(&self, root: AggregateRoot<S>) -> Result<Tracked<S>> {
        let handle = Arc::new(Mutex::new(root));
        self.attach(Arc::clone(&handle)).await?;
        Ok(handle)
    }

    /// Tracks an aggregate handle as new. Attaching the same handle again
    /// is a no-op; attaching a different instance with a tracked key fails
    /// with `DuplicateKey`.
    pub async fn attach(&self, handle: Tracked<S>) -> Result<()> {
        let id = handle.lock().await.id();
        let mut tracking = self.tracking.lock().await;
        if let Some(entry) = tracking.entries.get(&id) {
            if Arc::ptr_eq(&entry.handle, &handle) {
                return Ok(());
            }
            return Err(ProcessingError::DuplicateKey(id));
        }
        tracking.track(
            id,
            Entry {
                handle,
                status: Status::Added,
                snapshot_version: None,
            },
        );
        Ok(())
    }

    /// Marks an aggregate for deletion on the next flush. Removing an
    /// aggregate added in this unit of work just stops tracking it.
    pub async fn remove(&self, id: AggregateId) -> Result<()> {
        let mut tracking = self.tracking.lock().await;
        match tracking.entries.get(&id).map(|entry| entry.status) {
            Some(Status::Added) => tracking.forget(id),
            Some(Status::Loaded { .. }) => {
                if let Some(entry) = tracking.entries.get_mut(&id) {
                    entry.status = Status::Removed;
                }
            }
            Some(Status::Removed) => {}
            None => {
                let Some((root, snapshot_version)) = self.read(id).await? else {
                    return Err(ProcessingError::NotFound {
                        aggregate_type: S::aggregate_type(),
                        aggregate_id: id,
                    });
                };
                tracking.track(
                    id,
                    Entry {
                        handle: Arc::new(Mutex::new(root)),
                        status: Status::Removed,
                        snapshot_version,
                    },
                );
            }
        }
        Ok(())
    }

    /// True when `id` is in the identity map.
    pub async fn is_tracked(&self, id: AggregateId) -> bool {
        self.tracking.lock().await.entries.contains_key(&id)
    }

    /// Number of aggregates in the identity map.
    pub async fn tracked_count(&self) -> usize {
        self.tracking.lock().await.entries.len()
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        Ok(())
    }

    async fn read(&self, id: AggregateId) -> Result<Option<(AggregateRoot<S>, Option<Version>)>> {
        self.ensure_not_cancelled()?;
        match &self.persistence {
            Persistence::EventSourced { events, snapshots } => {
                self.replay(id, events.as_ref(), snapshots.as_deref()).await
            }
            Persistence::StateBased { states } => match states.select_by_key(id).await? {
                Some(snapshot) => {
                    let version = snapshot.version;
                    Ok(Some((AggregateRoot::from_snapshot(snapshot)?, Some(version))))
                }
                None => Ok(None),
            },
        }
    }

    /// Snapshot (if any) plus the events recorded after it.
    async fn replay(
        &self,
        id: AggregateId,
        events: &dyn EventStore,
        snapshots: Option<&dyn SnapshotStore>,
    ) -> Result<Option<(AggregateRoot<S>, Option<Version>)>> {
        let snapshot = match snapshots {
            Some(store) => store.select_by_key(id).await?,
            None => None,
        };
        let snapshot_version = snapshot.as_ref().map(|s| s.version);
        let mut root = match snapshot {
            Some(snapshot) => AggregateRoot::from_snapshot(snapshot)?,
            None => AggregateRoot::empty(id),
        };

        self.ensure_not_cancelled()?;
        let records = events.load_stream_from(id, root.version().next()).await?;
        if records.is_empty() && snapshot_version.is_none() {
            return Ok(None);
        }

        for record in records {
            let expected = root.version().next();
            if record.version != expected {
                return Err(EventStoreError::CorruptStream {
                    aggregate_id: id,
                    expected,
                    found: record.version,
                }
                .into());
            }
            if record.aggregate_type != S::aggregate_type() {
                return Err(EventStoreError::TypeMismatch {
                    aggregate_id: id,
                    expected: S::aggregate_type().to_string(),
                    found: record.aggregate_type,
                }
                .into());
            }
            let event: S::Event = record.decode()?;
            root.replay(&event)?;
        }
        Ok(Some((root, snapshot_version)))
    }

    fn records(
        &self,
        root: &AggregateRoot<S>,
        ctx: &FlushContext<'_>,
    ) -> Result<Vec<EventEnvelope>> {
        let timestamp = ctx.clock.utc_now();
        root.pending_events()
            .iter()
            .map(|pending| -> Result<EventEnvelope> {
                Ok(EventEnvelope::builder()
                    .aggregate_id(root.id())
                    .aggregate_type(S::aggregate_type())
                    .event_type(pending.event.event_type())
                    .version(pending.version)
                    .timestamp(timestamp)
                    .correlation_id(ctx.correlation_id)
                    .payload(&pending.event)?
                    .try_build()?)
            })
            .collect()
    }

    /// Writes one aggregate. Returns the snapshot version after the write,
    /// or `None` if there was nothing to write.
    async fn write(
        &self,
        root: &mut AggregateRoot<S>,
        mode: WriteMode,
        snapshot_version: Option<Version>,
        ctx: &mut FlushContext<'_>,
    ) -> Result<Option<Option<Version>>> {
        match &self.persistence {
            Persistence::EventSourced { events, snapshots } => {
                if !root.has_pending_events() {
                    return Ok(None);
                }
                let records = self.records(root, ctx)?;
                let expected = match mode {
                    WriteMode::Insert => ExpectedVersion::NoStream,
                    WriteMode::Update(original) => ExpectedVersion::Exact(original),
                };
                let version = events.append(records.clone(), expected).await?;

                let snapshot_version = match snapshots {
                    Some(store) if S::should_snapshot(mode.previous_version(), version) => {
                        self.write_snapshot(store.as_ref(), root, snapshot_version, ctx)
                            .await
                    }
                    _ => snapshot_version,
                };
                Self::publish(root, records, ctx);
                Ok(Some(snapshot_version))
            }
            Persistence::StateBased { states } => {
                if matches!(mode, WriteMode::Update(_)) && !root.has_pending_events() {
                    return Ok(None);
                }
                let records = self.records(root, ctx)?;
                let snapshot = root.snapshot(ctx.clock.utc_now())?;
                match mode {
                    WriteMode::Insert => states.insert(snapshot).await?,
                    WriteMode::Update(original) => states.update(snapshot, original).await?,
                }
                Self::publish(root, records, ctx);
                Ok(Some(Some(root.version())))
            }
        }
    }

    /// A failed snapshot write leaves the previous snapshot in place; the
    /// events are already stored, so the aggregate still loads correctly.
    async fn write_snapshot(
        &self,
        store: &dyn SnapshotStore,
        root: &AggregateRoot<S>,
        current: Option<Version>,
        ctx: &FlushContext<'_>,
    ) -> Option<Version> {
        let result: Result<()> = async {
            let snapshot = root.snapshot(ctx.clock.utc_now())?;
            match current {
                Some(version) => store.update(snapshot, version).await?,
                None => store.insert(snapshot).await?,
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    aggregate_id = %root.id(),
                    version = %root.version(),
                    "snapshot written"
                );
                Some(root.version())
            }
            Err(err) => {
                tracing::warn!(
                    aggregate_type = S::aggregate_type(),
                    aggregate_id = %root.id(),
                    error = %err,
                    "snapshot write failed"
                );
                metrics::counter!(
                    telemetry::SNAPSHOT_FAILURES,
                    "aggregate_type" => S::aggregate_type()
                )
                .increment(1);
                current
            }
        }
    }

    fn publish(
        root: &mut AggregateRoot<S>,
        records: Vec<EventEnvelope>,
        ctx: &mut FlushContext<'_>,
    ) {
        let pending = root.take_pending_events();
        metrics::counter!(telemetry::EVENTS_PUBLISHED, "aggregate_type" => S::aggregate_type())
            .increment(pending.len() as u64);
        for (record, pending) in records.into_iter().zip(pending) {
            ctx.bus.publish(PublishedEvent::new(record, pending.event));
        }
    }

    async fn delete(&self, id: AggregateId) -> Result<()> {
        match &self.persistence {
            Persistence::EventSourced { events, snapshots } => {
                events.delete_stream(id).await?;
                if let Some(store) = snapshots {
                    store.delete(id).await?;
                }
            }
            Persistence::StateBased { states } => states.delete(id).await?,
        }
        tracing::debug!(aggregate_id = %id, "aggregate deleted");
        Ok(())
    }
}

#[async_trait]
impl<S: SnapshotCapable> Flushable for Repository<S> {
    fn name(&self) -> &'static str {
        S::aggregate_type()
    }

    #[tracing::instrument(skip(self, ctx), fields(aggregate_type = S::aggregate_type()))]
    async fn flush(&self, ctx: &mut FlushContext<'_>) -> Result<usize> {
        let mut tracking = self.tracking.lock().await;
        let mut written = 0;

        for id in tracking.order.clone() {
            let Some(entry) = tracking.entries.get(&id) else {
                continue;
            };
            let handle = Arc::clone(&entry.handle);
            let status = entry.status;
            let snapshot_version = entry.snapshot_version;
            ctx.ensure_not_cancelled()?;

            let mode = match status {
                Status::Removed => {
                    self.delete(id).await?;
                    tracking.forget(id);
                    written += 1;
                    continue;
                }
                Status::Added => WriteMode::Insert,
                Status::Loaded { original_version } => WriteMode::Update(original_version),
            };

            let mut root = handle.lock().await;
            let Some(snapshot_version) = self.write(&mut root, mode, snapshot_version, ctx).await?
            else {
                continue;
            };
            if let Some(entry) = tracking.entries.get_mut(&id) {
                entry.status = Status::Loaded {
                    original_version: root.version(),
                };
                entry.snapshot_version = snapshot_version;
            }
            written += 1;
        }

        if written > 0 {
            metrics::counter!(
                telemetry::AGGREGATES_FLUSHED,
                "aggregate_type" => S::aggregate_type()
            )
            .increment(written as u64);
            tracing::debug!(written, "repository flushed");
        }
        Ok(written)
    }
}

impl<S: SnapshotCapable> fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate_type", &S::aggregate_type())
            .field("persistence", &self.persistence)
            .finish()
    }
}
