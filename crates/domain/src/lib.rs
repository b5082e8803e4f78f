//! Domain abstractions for the message-processing runtime.
//!
//! This crate provides:
//! - [`AggregateRoot`] around an [`AggregateState`], with a pending-event
//!   buffer and a version counter
//! - capability traits ([`Keyed`], [`Versioned`], [`EventSourced`]) for code
//!   that works on any aggregate
//! - [`ApplyRegistry`] for aggregates with an open set of event kinds
//! - [`Message`], [`Query`] and [`ValidationErrors`] for everything routed
//!   through the dispatcher
//! - business-rule and configuration errors

pub mod aggregate;
pub mod buffer;
pub mod error;
pub mod message;
pub mod registry;

pub use aggregate::{
    AggregateRoot, AggregateState, DomainEvent, EventSourced, Keyed, SnapshotCapable, Versioned,
};
pub use buffer::{EventBuffer, PendingEvent};
pub use error::{BusinessRuleViolation, ConfigurationError, DomainError};
pub use message::{Message, Query, ValidationErrors};
pub use registry::{ApplyFn, ApplyRegistry};
