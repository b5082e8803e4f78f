//! The per-dispatch scope handed to handlers.
//!
//! A [`Context`] owns one unit of work: its dependency cache, the
//! repositories resolved through it and the event bus their flushes publish
//! on. Committing flushes everything and dispatches the published events to
//! their handlers inside the same scope, repeating until no handler produces
//! new events. Dropping a context without committing discards the work.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use domain::{ConfigurationError, SnapshotCapable};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Principal;
use crate::cache::{DependencyCache, Invalidate, Lifetime};
use crate::clock::Clock;
use crate::dispatcher::{DispatchOptions, DispatchOutcome, Runtime};
use crate::envelope::MessageEnvelope;
use crate::error::{ProcessingError, Result};
use crate::event_bus::EventBus;
use crate::pipeline::Invocation;
use crate::repository::Repository;
use crate::state::DispatchState;
use crate::telemetry;
use crate::unit_of_work::{FlushContext, Flushable, UnitOfWork};

/// One unit-of-work scope. Closes when dropped.
pub struct Context {
    runtime: Arc<Runtime>,
    correlation_id: Uuid,
    principal: Principal,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    cache: DependencyCache,
    unit_of_work: UnitOfWork,
    bus: EventBus,
    reply: Option<Box<dyn Any + Send + Sync>>,
    state: DispatchState,
}

impl Context {
    pub(crate) fn new(runtime: Arc<Runtime>, options: DispatchOptions) -> Self {
        let DispatchOptions {
            principal,
            clock,
            cancellation,
            correlation_id,
        } = options;
        let clock = clock.unwrap_or_else(|| Arc::clone(&runtime.clock));
        let cache = DependencyCache::new(Arc::clone(&runtime.singletons));

        Self {
            runtime,
            correlation_id: correlation_id.unwrap_or_else(Uuid::new_v4),
            principal,
            clock,
            cancellation: cancellation.unwrap_or_default(),
            cache,
            unit_of_work: UnitOfWork::new(),
            bus: EventBus::new(),
            reply: None,
            state: DispatchState::Idle,
        }
    }

    /// Shared by every event stored while this scope commits.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// The caller the scope runs for.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The clock in effect for this scope.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Replaces the clock for the rest of this scope.
    pub fn override_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Token that cancels this scope.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fails with `Cancelled` once the token fired.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        Ok(())
    }

    /// Events flushed in this scope and not yet dispatched.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Where the scope stands in its dispatch.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// The repository for aggregates with state `S`, shared by everything
    /// running in this scope and enlisted in its unit of work.
    pub fn repository<S: SnapshotCapable>(&mut self) -> Arc<Repository<S>> {
        let runtime = &self.runtime;
        let cancellation = &self.cancellation;
        let repository = self.cache.get_or_add(Lifetime::PerUnitOfWork, || {
            Repository::<S>::new(runtime.persistence_for::<S>())
                .with_cancellation(cancellation.clone())
        });
        self.unit_of_work.enlist(repository.clone());
        repository
    }

    /// Resolves a dependency registered on the dispatcher, honoring its
    /// lifetime.
    pub fn resolve<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        let missing = || ConfigurationError::MissingDependency {
            type_name: type_name::<T>(),
        };
        let runtime = Arc::clone(&self.runtime);
        let dependency = runtime.dependencies.get(&TypeId::of::<T>()).ok_or_else(missing)?;

        let on_invalidate = dependency.on_invalidate.as_ref().map(|callback| {
            let callback = Arc::clone(callback);
            Box::new(move |value: &(dyn Any + Send + Sync)| callback(value)) as Invalidate
        });
        let shared = self.cache.get_or_insert(
            TypeId::of::<T>(),
            dependency.lifetime,
            || (dependency.factory)(),
            on_invalidate,
        );
        shared.downcast::<T>().map_err(|_| missing().into())
    }

    /// Caches a value created on the spot rather than registered up front.
    pub fn get_or_add<T, F>(&mut self, lifetime: Lifetime, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.cache.get_or_add(lifetime, factory)
    }

    /// Adds `target` to the unit of work. Returns false if it was already
    /// enlisted.
    pub fn enlist(&mut self, target: Arc<dyn Flushable>) -> bool {
        self.unit_of_work.enlist(target)
    }

    /// Flushes the unit of work and cascades the published events until none
    /// are left, then closes the scope.
    ///
    /// Work flushed before a failure stays flushed; the failure is returned
    /// and the rest of the scope is discarded.
    #[tracing::instrument(skip(self), fields(correlation_id = %self.correlation_id))]
    pub async fn commit(mut self) -> Result<DispatchOutcome> {
        let result = self.flush_and_cascade().await;
        if result.is_err() {
            self.fail();
        }
        self.close_scope();
        result
    }

    /// Discards the scope without flushing. Dropping it has the same effect.
    pub fn close(mut self) {
        self.close_scope();
    }

    pub(crate) fn set_reply<T: Send + Sync + 'static>(&mut self, value: T) {
        self.reply = Some(Box::new(value));
    }

    pub(crate) fn take_reply(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.reply.take()
    }

    /// Runs `message` through the pipeline to its command or query handler.
    pub(crate) async fn process(&mut self, message: &MessageEnvelope) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        let registration = runtime.handlers.handler_for(message.type_id()).ok_or(
            ConfigurationError::MissingHandler {
                message_type: message.type_name(),
            },
        )?;
        self.ensure_not_cancelled()?;
        self.transition(DispatchState::PipelineEntered)?;

        let result = match runtime
            .pipeline
            .run(Invocation {
                message,
                handler: registration,
                context: &mut *self,
            })
            .await
        {
            Ok(()) => self.transition(DispatchState::Succeeded),
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// Called by the pipeline right before a handler runs.
    pub(crate) fn enter_handler(&mut self) -> std::result::Result<(), ConfigurationError> {
        match self.state {
            DispatchState::PipelineEntered => {
                self.state = self.state.transition(DispatchState::HandlerInvoked)?;
                Ok(())
            }
            DispatchState::Cascading => Ok(()),
            from => Err(ConfigurationError::IllegalTransition {
                from: from.as_str(),
                to: DispatchState::HandlerInvoked.as_str(),
            }),
        }
    }

    async fn flush_and_cascade(&mut self) -> Result<DispatchOutcome> {
        self.transition(DispatchState::Flushing)?;
        let max_rounds = self.runtime.config.max_cascade_rounds;
        let mut events = Vec::new();
        let mut rounds = 0;

        loop {
            self.ensure_not_cancelled()?;
            let mut flush = FlushContext::new(
                &mut self.bus,
                self.clock.as_ref(),
                &self.cancellation,
                self.correlation_id,
            );
            self.unit_of_work.flush(&mut flush).await?;

            let published = self.bus.drain();
            if published.is_empty() {
                break;
            }
            if rounds == max_rounds {
                return Err(ConfigurationError::CascadeLimitExceeded { limit: max_rounds }.into());
            }
            rounds += 1;
            tracing::debug!(round = rounds, events = published.len(), "cascading");

            self.transition(DispatchState::Cascading)?;
            for event in &published {
                self.dispatch_event(&event.message).await?;
            }
            events.extend(published.into_iter().map(|p| p.record));
            self.transition(DispatchState::Flushing)?;
        }

        metrics::histogram!(telemetry::CASCADE_ROUNDS).record(rounds as f64);
        Ok(DispatchOutcome {
            correlation_id: self.correlation_id,
            events,
            cascade_rounds: rounds,
        })
    }

    async fn dispatch_event(&mut self, event: &MessageEnvelope) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        for registration in runtime.handlers.event_handlers(event.type_id()) {
            self.ensure_not_cancelled()?;
            runtime
                .pipeline
                .run(Invocation {
                    message: event,
                    handler: registration,
                    context: &mut *self,
                })
                .await?;
        }
        Ok(())
    }

    fn transition(&mut self, to: DispatchState) -> Result<()> {
        self.state = self.state.transition(to)?;
        Ok(())
    }

    fn fail(&mut self) {
        if self.state.can_transition_to(DispatchState::Failed) {
            self.state = DispatchState::Failed;
        }
    }

    fn close_scope(&mut self) {
        if self.state == DispatchState::Closed {
            return;
        }
        tracing::trace!(from = %self.state, "scope closed");
        self.cache.close();
        self.state = DispatchState::Closed;
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close_scope();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("correlation_id", &self.correlation_id)
            .field("principal", &self.principal)
            .field("state", &self.state)
            .field("unit_of_work", &self.unit_of_work)
            .field("pending_events", &self.bus.pending().len())
            .finish()
    }
}
