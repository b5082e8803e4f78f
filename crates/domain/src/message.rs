//! Messages and self-validation.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// An immutable value routed by its type.
///
/// Commands, queries and domain events are all messages. A message may
/// validate itself; the validation stage of the pipeline rejects it before
/// any handler runs if it does not.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Name used in logs and metrics.
    fn message_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// A message answered with a value instead of a state change.
pub trait Query: Message {
    type Output: Send + Sync + 'static;
}

/// Structural validation failures keyed by member name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for `member`.
    pub fn add(&mut self, member: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(member.into())
            .or_default()
            .push(message.into());
    }

    /// Records a failure for `member` unless `condition` holds.
    pub fn check(&mut self, condition: bool, member: &str, message: &str) {
        if !condition {
            self.add(member, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Messages recorded for one member.
    pub fn get(&self, member: &str) -> &[String] {
        self.errors.get(member).map(Vec::as_slice).unwrap_or_default()
    }

    /// Names of the fields with at least one error.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// `Ok` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (member, messages) in &self.errors {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{member}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
