//! Message processing runtime.
//!
//! This crate provides:
//! - [`Dispatcher`], routing commands and queries through a filter
//!   [`Pipeline`] to exactly one handler each
//! - [`Context`], the scope a handler runs in: principal, clock,
//!   cancellation, dependency cache and unit of work
//! - [`Repository`], tracking aggregates for one unit of work and writing
//!   them with optimistic concurrency
//! - cascading dispatch of the events a commit publishes, within the same
//!   scope
//! - configuration from the environment and tracing setup

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event_bus;
pub mod handler;
pub mod pipeline;
pub mod repository;
pub mod state;
pub mod telemetry;
pub mod unit_of_work;

pub use auth::{Principal, Requirements, Unauthorized, authorize};
pub use cache::{DependencyCache, Lifetime, SingletonCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{LogFormat, ProcessorConfig};
pub use context::Context;
pub use dispatcher::{DispatchOptions, DispatchOutcome, Dispatcher, DispatcherBuilder};
pub use envelope::MessageEnvelope;
pub use error::{ErrorKind, ProcessingError, Result};
pub use event_bus::{EventBus, PublishedEvent};
pub use handler::{Handler, HandlerKind, HandlerRegistry, QueryHandler, Registration};
pub use pipeline::{
    AuthorizationFilter, ExceptionFilter, Filter, Invocation, Next, Pipeline, ValidationFilter,
};
pub use repository::{Persistence, Repository, Tracked};
pub use state::DispatchState;
pub use telemetry::init_tracing;
pub use unit_of_work::{FlushContext, Flushable, UnitOfWork};
