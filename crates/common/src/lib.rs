//! Shared types used by every crate of the message-processing runtime.

mod types;

pub use types::{AggregateId, ParseAggregateIdError};
