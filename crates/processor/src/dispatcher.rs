//! Entry point for commands, queries and host-managed scopes.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use domain::{ConfigurationError, DomainEvent, Message, Query, SnapshotCapable};
use event_store::{EventEnvelope, EventStore, SnapshotStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Principal;
use crate::cache::{Lifetime, Shared, SingletonCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ProcessorConfig;
use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::{ProcessingError, Result};
use crate::handler::{Handler, HandlerRegistry, QueryHandler};
use crate::pipeline::{Filter, Pipeline};
use crate::repository::Persistence;
use crate::telemetry;

type Factory = Arc<dyn Fn() -> Shared + Send + Sync>;
type OnInvalidate = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

pub(crate) struct Dependency {
    pub(crate) lifetime: Lifetime,
    pub(crate) factory: Factory,
    pub(crate) on_invalidate: Option<OnInvalidate>,
}

/// Everything a dispatcher's scopes share. Immutable once built.
pub(crate) struct Runtime {
    pub(crate) handlers: HandlerRegistry,
    pub(crate) pipeline: Pipeline,
    pub(crate) dependencies: HashMap<TypeId, Dependency>,
    pub(crate) singletons: Arc<SingletonCache>,
    pub(crate) event_store: Arc<dyn EventStore>,
    pub(crate) snapshot_store: Option<Arc<dyn SnapshotStore>>,
    pub(crate) state_stores: HashMap<TypeId, Arc<dyn SnapshotStore>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: ProcessorConfig,
}

impl Runtime {
    /// State-based if a store was registered for `S`, event-sourced
    /// otherwise.
    pub(crate) fn persistence_for<S: 'static>(&self) -> Persistence {
        if let Some(store) = self.state_stores.get(&TypeId::of::<S>()) {
            return Persistence::state_based(Arc::clone(store));
        }
        let persistence = Persistence::event_sourced(Arc::clone(&self.event_store));
        match &self.snapshot_store {
            Some(store) => persistence.with_snapshots(Arc::clone(store)),
            None => persistence,
        }
    }
}

/// Per-dispatch settings. Anything unset falls back to the dispatcher's
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    pub(crate) principal: Principal,
    pub(crate) clock: Option<Arc<dyn Clock>>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) correlation_id: Option<Uuid>,
}

impl DispatchOptions {
    /// Anonymous caller, the dispatcher clock and a fresh correlation id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs as `principal`.
    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Overrides the clock for this scope only.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Cancels the scope when `token` fires.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Uses `id` instead of a fresh correlation id.
    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// What a committed scope wrote.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub correlation_id: Uuid,
    /// Every stored event, in flush order, including those produced by
    /// cascaded event handlers.
    pub events: Vec<EventEnvelope>,
    /// Number of flush rounds that published events.
    pub cascade_rounds: usize,
}

impl DispatchOutcome {
    /// Stored event names, in publication order.
    pub fn event_types(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.event_type.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Entry point for commands, queries and host scopes. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    runtime: Arc<Runtime>,
}

impl Dispatcher {
    /// Starts a dispatcher over `event_store`.
    pub fn builder(event_store: Arc<dyn EventStore>) -> DispatcherBuilder {
        DispatcherBuilder::new(event_store)
    }

    /// Opens a scope the host drives itself: resolve repositories, change
    /// aggregates, then [`Context::commit`].
    pub fn begin_scope(&self, options: DispatchOptions) -> Context {
        Context::new(Arc::clone(&self.runtime), options)
    }

    /// Dispatches `message` as an anonymous caller.
    pub async fn dispatch<M: Message>(&self, message: M) -> Result<DispatchOutcome> {
        self.dispatch_with(message, DispatchOptions::default()).await
    }

    /// Runs `message` through the pipeline to its handler in a fresh scope
    /// and commits the scope.
    #[tracing::instrument(skip_all, fields(message_type = message.message_type()))]
    pub async fn dispatch_with<M: Message>(
        &self,
        message: M,
        options: DispatchOptions,
    ) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let envelope = MessageEnvelope::new(message);
        let mut scope = self.begin_scope(options);
        tracing::debug!(correlation_id = %scope.correlation_id(), "dispatching");

        let result = async {
            scope.process(&envelope).await?;
            scope.commit().await
        }
        .await;

        record(envelope.message_type(), started, &result);
        result
    }

    /// Runs `query` as an anonymous caller.
    pub async fn query<Q: Query>(&self, query: Q) -> Result<Q::Output> {
        self.query_with(query, DispatchOptions::default()).await
    }

    /// Like [`Dispatcher::dispatch_with`], returning the handler's answer.
    #[tracing::instrument(skip_all, fields(message_type = query.message_type()))]
    pub async fn query_with<Q: Query>(
        &self,
        query: Q,
        options: DispatchOptions,
    ) -> Result<Q::Output> {
        let started = Instant::now();
        let envelope = MessageEnvelope::new(query);
        let mut scope = self.begin_scope(options);

        let result = async {
            scope.process(&envelope).await?;
            let reply = scope.take_reply();
            scope.commit().await?;
            reply
                .and_then(|reply| reply.downcast::<Q::Output>().ok())
                .map(|output| *output)
                .ok_or_else(|| {
                    ProcessingError::Unexpected(format!(
                        "query {} produced no answer",
                        envelope.message_type()
                    ))
                })
        }
        .await;

        record(envelope.message_type(), started, &result);
        result
    }

    /// Settings the dispatcher was built with.
    pub fn config(&self) -> &ProcessorConfig {
        &self.runtime.config
    }

    /// The filters every message passes through.
    pub fn pipeline(&self) -> &Pipeline {
        &self.runtime.pipeline
    }

    /// Releases every singleton dependency.
    pub fn shutdown(&self) {
        self.runtime.singletons.shutdown();
        tracing::info!("dispatcher shut down");
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.runtime.handlers.len())
            .field("pipeline", &self.runtime.pipeline)
            .field("config", &self.runtime.config)
            .finish()
    }
}

fn record<T>(message_type: &'static str, started: Instant, result: &Result<T>) {
    metrics::counter!(telemetry::MESSAGES_DISPATCHED, "message_type" => message_type).increment(1);
    metrics::histogram!(telemetry::DISPATCH_DURATION, "message_type" => message_type)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(_) => tracing::debug!("dispatch completed"),
        Err(err) => {
            metrics::counter!(
                telemetry::DISPATCH_FAILURES,
                "message_type" => message_type,
                "kind" => err.kind().as_str()
            )
            .increment(1);
            tracing::warn!(kind = %err.kind(), error = %err, "dispatch failed");
        }
    }
}

/// Collects handlers, dependencies and storage for a [`Dispatcher`].
///
/// Registration problems are collected and reported together by
/// [`DispatcherBuilder::build`].
pub struct DispatcherBuilder {
    handlers: HandlerRegistry,
    pipeline: Pipeline,
    dependencies: HashMap<TypeId, Dependency>,
    event_store: Arc<dyn EventStore>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    state_stores: HashMap<TypeId, Arc<dyn SnapshotStore>>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
    errors: Vec<ConfigurationError>,
}

impl DispatcherBuilder {
    /// A builder with the standard pipeline and no handlers.
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            pipeline: Pipeline::standard(),
            dependencies: HashMap::new(),
            event_store,
            snapshot_store: None,
            state_stores: HashMap::new(),
            clock: Arc::new(SystemClock),
            config: ProcessorConfig::default(),
            errors: Vec::new(),
        }
    }

    /// Registers the only handler for command `M`.
    pub fn register_handler<M: Message, H: Handler<M>>(mut self, handler: H) -> Self {
        if let Err(err) = self.handlers.register(handler) {
            self.errors.push(err);
        }
        self
    }

    /// Registers the only handler for query `Q`.
    pub fn register_query_handler<Q: Query, H: QueryHandler<Q>>(mut self, handler: H) -> Self {
        if let Err(err) = self.handlers.register_query(handler) {
            self.errors.push(err);
        }
        self
    }

    /// Adds a handler for event `E`. Events fan out to every handler.
    pub fn register_event_handler<E: DomainEvent, H: Handler<E>>(mut self, handler: H) -> Self {
        self.handlers.register_event(handler);
        self
    }

    /// Registers `factory` as the source of `T` for [`Context::resolve`].
    pub fn register_dependency<T, F>(self, lifetime: Lifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.insert_dependency::<T>(lifetime, Arc::new(move || Arc::new(factory()) as Shared), None)
    }

    /// Registers a dependency whose cached instances are handed to
    /// `on_invalidate` when their scope closes, or on shutdown for
    /// singletons.
    pub fn register_dependency_with<T, F, I>(
        self,
        lifetime: Lifetime,
        factory: F,
        on_invalidate: I,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        I: Fn(&T) + Send + Sync + 'static,
    {
        let on_invalidate: OnInvalidate = Arc::new(move |value: &(dyn Any + Send + Sync)| {
            if let Some(value) = value.downcast_ref::<T>() {
                on_invalidate(value);
            }
        });
        self.insert_dependency::<T>(
            lifetime,
            Arc::new(move || Arc::new(factory()) as Shared),
            Some(on_invalidate),
        )
    }

    fn insert_dependency<T: 'static>(
        mut self,
        lifetime: Lifetime,
        factory: Factory,
        on_invalidate: Option<OnInvalidate>,
    ) -> Self {
        let type_id = TypeId::of::<T>();
        if self.dependencies.contains_key(&type_id) {
            self.errors.push(ConfigurationError::DuplicateDependency {
                type_name: type_name::<T>(),
            });
            return self;
        }
        self.dependencies.insert(
            type_id,
            Dependency {
                lifetime,
                factory,
                on_invalidate,
            },
        );
        self
    }

    /// Snapshot store for event-sourced aggregates.
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Persists aggregates with state `S` as full state in `store` instead
    /// of as events.
    pub fn state_based<S: SnapshotCapable>(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.state_stores.insert(TypeId::of::<S>(), store);
        self
    }

    /// Appends a filter after the standard ones.
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.pipeline = self.pipeline.with_filter(filter);
        self
    }

    /// Replaces the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the default settings.
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Fails with the first registration error, logging all of them.
    pub fn build(self) -> std::result::Result<Dispatcher, ConfigurationError> {
        for err in &self.errors {
            tracing::error!(error = %err, "invalid registration");
        }
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        tracing::info!(
            handlers = self.handlers.len(),
            dependencies = self.dependencies.len(),
            stages = ?self.pipeline.stages(),
            "dispatcher built"
        );
        Ok(Dispatcher {
            runtime: Arc::new(Runtime {
                handlers: self.handlers,
                pipeline: self.pipeline,
                dependencies: self.dependencies,
                singletons: Arc::new(SingletonCache::new()),
                event_store: self.event_store,
                snapshot_store: self.snapshot_store,
                state_stores: self.state_stores,
                clock: self.clock,
                config: self.config,
            }),
        })
    }
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("handlers", &self.handlers.len())
            .field("dependencies", &self.dependencies.len())
            .field("errors", &self.errors)
            .finish()
    }
}
