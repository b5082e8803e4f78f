//! Enlistment and one-shot flushing of the work done in a scope.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ProcessingError, Result};
use crate::event_bus::EventBus;

/// What a flush needs from its scope.
pub struct FlushContext<'a> {
    pub bus: &'a mut EventBus,
    pub clock: &'a dyn Clock,
    pub cancellation: &'a CancellationToken,
    pub correlation_id: Uuid,
}

impl<'a> FlushContext<'a> {
    /// Context for one flush round.
    pub fn new(
        bus: &'a mut EventBus,
        clock: &'a dyn Clock,
        cancellation: &'a CancellationToken,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            bus,
            clock,
            cancellation,
            correlation_id,
        }
    }

    /// Fails with `Cancelled` once the scope token fired.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        Ok(())
    }
}

/// Something holding changes to write when the unit of work commits.
#[async_trait]
pub trait Flushable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes every pending change and publishes the resulting events on
    /// `ctx.bus`. Returns the number of aggregates written.
    async fn flush(&self, ctx: &mut FlushContext<'_>) -> Result<usize>;
}

/// Flushables enlisted in one scope, in enlistment order.
#[derive(Default)]
pub struct UnitOfWork {
    enlisted: Vec<Arc<dyn Flushable>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enlists `target` once. Returns false if it was already enlisted.
    pub fn enlist(&mut self, target: Arc<dyn Flushable>) -> bool {
        if self.enlisted.iter().any(|e| Arc::ptr_eq(e, &target)) {
            return false;
        }
        tracing::trace!(target_name = target.name(), "enlisted");
        self.enlisted.push(target);
        true
    }

    pub fn len(&self) -> usize {
        self.enlisted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enlisted.is_empty()
    }

    /// Flushes every enlisted target in order. The first failure stops the
    /// flush; targets already flushed stay flushed.
    pub async fn flush(&self, ctx: &mut FlushContext<'_>) -> Result<usize> {
        let mut written = 0;
        for target in &self.enlisted {
            ctx.ensure_not_cancelled()?;
            written += target.flush(ctx).await.inspect_err(|err| {
                tracing::debug!(target_name = target.name(), error = %err, "flush aborted");
            })?;
        }
        Ok(written)
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.enlisted.iter().map(|e| e.name()).collect();
        f.debug_struct("UnitOfWork").field("enlisted", &names).finish()
    }
}
