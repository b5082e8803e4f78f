//! Domain error types.

use std::error::Error as StdError;

use thiserror::Error;

/// An aggregate method refused an operation because a business precondition
/// does not hold. Raised before any event is published, so the aggregate is
/// left exactly as it was.
#[derive(Debug, Error)]
#[error("{aggregate_type} rule violated: {source}")]
pub struct BusinessRuleViolation {
    aggregate_type: &'static str,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl BusinessRuleViolation {
    /// Wraps a rule error raised by `aggregate_type`.
    pub fn new<E>(aggregate_type: &'static str, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            aggregate_type,
            source: Box::new(error),
        }
    }

    /// Aggregate type whose rule was violated.
    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    /// Returns the aggregate-specific error if it is an `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }
}

/// Programming errors. Never business-recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("apply function for {event_type} on {aggregate_type} is already registered")]
    DuplicateApplyHandler {
        aggregate_type: &'static str,
        event_type: &'static str,
    },

    #[error("no apply function for {event_type} on {aggregate_type}")]
    MissingApplyHandler {
        aggregate_type: &'static str,
        event_type: &'static str,
    },

    #[error("handler for {message_type} is already registered")]
    DuplicateHandler { message_type: &'static str },

    #[error("no handler registered for {message_type}")]
    MissingHandler { message_type: &'static str },

    #[error("handler for {expected} was invoked with {actual}")]
    MessageTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("dependency {type_name} is already registered")]
    DuplicateDependency { type_name: &'static str },

    #[error("no dependency registered for {type_name}")]
    MissingDependency { type_name: &'static str },

    #[error("event cascade did not settle within {limit} rounds")]
    CascadeLimitExceeded { limit: usize },

    #[error("illegal dispatch transition from {from} to {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Errors raised by aggregate code.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    BusinessRule(#[from] BusinessRuleViolation),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq)]
    #[error("name is taken")]
    struct NameTaken;

    #[test]
    fn test_violation_keeps_the_typed_source() {
        let violation = BusinessRuleViolation::new("User", NameTaken);

        assert_eq!(violation.aggregate_type(), "User");
        assert_eq!(violation.downcast_ref::<NameTaken>(), Some(&NameTaken));
        assert_eq!(violation.to_string(), "User rule violated: name is taken");
    }

    #[test]
    fn test_domain_error_is_transparent_for_business_rules() {
        let err: DomainError = BusinessRuleViolation::new("User", NameTaken).into();
        assert_eq!(err.to_string(), "User rule violated: name is taken");
    }
}
