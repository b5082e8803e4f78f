//! Storage-adapter contracts for the message-processing runtime.
//!
//! Two adapter shapes are defined:
//! - [`EventStore`] persists per-aggregate event streams with an
//!   expected-version check on every append
//! - [`SnapshotStore`] persists keyed aggregate state with
//!   select/insert/update/delete, where update is checked against the
//!   version the writer originally read
//!
//! In-memory implementations of both are provided for tests and embedding.

pub mod error;
pub mod event;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStoreExt, EventStream, ExpectedVersion, SnapshotStore};
