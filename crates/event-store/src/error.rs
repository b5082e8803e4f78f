use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors reported by storage adapters.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The persisted version no longer matches the version the writer loaded.
    /// Another writer committed first.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// An insert collided with an aggregate that is already persisted.
    #[error("Duplicate key: aggregate {0} already exists")]
    DuplicateKey(AggregateId),

    /// The aggregate was not found.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// A stored stream is not a gapless version sequence.
    #[error("Corrupt stream for aggregate {aggregate_id}: expected version {expected}, found {found}")]
    CorruptStream {
        aggregate_id: AggregateId,
        expected: Version,
        found: Version,
    },

    /// Stored data belongs to a different aggregate type than the reader expects.
    #[error("Aggregate {aggregate_id} is a {found}, expected {expected}")]
    TypeMismatch {
        aggregate_id: AggregateId,
        expected: String,
        found: String,
    },

    /// The batch handed to `append` is malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
