//! Errors returned to callers of the dispatcher.

use std::fmt;

use common::AggregateId;
use domain::{BusinessRuleViolation, ConfigurationError, DomainError, ValidationErrors};
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::auth::Unauthorized;

/// Failure of a dispatch, query or commit.
///
/// Store conflicts are lifted out of [`EventStoreError`] so callers can match
/// on them without reaching into the storage layer.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    BusinessRule(#[from] BusinessRuleViolation),

    #[error("Duplicate key: aggregate {0} already exists")]
    DuplicateKey(AggregateId),

    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] Unauthorized),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{aggregate_type} {aggregate_id} not found")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A handler panicked or otherwise failed in a way no stage anticipated.
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl ProcessingError {
    /// Flat category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Validation(_) => ErrorKind::Validation,
            ProcessingError::BusinessRule(_) => ErrorKind::BusinessRule,
            ProcessingError::DuplicateKey(_) => ErrorKind::DuplicateKey,
            ProcessingError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            ProcessingError::Unauthorized(_) => ErrorKind::Unauthorized,
            ProcessingError::Configuration(_) => ErrorKind::Configuration,
            ProcessingError::NotFound { .. } => ErrorKind::NotFound,
            ProcessingError::Cancelled => ErrorKind::Cancelled,
            ProcessingError::Store(_) => ErrorKind::Store,
            ProcessingError::Serialization(_) => ErrorKind::Serialization,
            ProcessingError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Returns the aggregate-specific rule error if this is a violation of
    /// type `E`.
    pub fn business_rule<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            ProcessingError::BusinessRule(violation) => violation.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<EventStoreError> for ProcessingError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => ProcessingError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            EventStoreError::DuplicateKey(aggregate_id) => {
                ProcessingError::DuplicateKey(aggregate_id)
            }
            EventStoreError::Serialization(err) => ProcessingError::Serialization(err),
            other => ProcessingError::Store(other),
        }
    }
}

impl From<DomainError> for ProcessingError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::BusinessRule(violation) => ProcessingError::BusinessRule(violation),
            DomainError::Configuration(err) => ProcessingError::Configuration(err),
        }
    }
}

/// Flat error category, used as a log field and metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    DuplicateKey,
    ConcurrencyConflict,
    Unauthorized,
    Configuration,
    NotFound,
    Cancelled,
    Store,
    Serialization,
    Unexpected,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::DuplicateKey => "duplicate_key",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Store => "store",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for processing operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;
