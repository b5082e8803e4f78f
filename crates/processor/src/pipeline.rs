//! The filter chain every message passes through on its way to a handler.
//!
//! Filters run outermost first. The standard pipeline is
//! `exception → authorization → validation → handler`; custom filters are
//! appended after validation, closest to the handler. A filter may stop the
//! chain by returning an error without calling [`Next::run`].

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::auth::authorize;
use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::{ProcessingError, Result};
use crate::handler::Registration;

/// One message on its way through the pipeline.
pub struct Invocation<'a> {
    pub message: &'a MessageEnvelope,
    pub handler: &'a Registration,
    pub context: &'a mut Context,
}

/// The rest of the chain after the current filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
}

impl Next<'_> {
    /// Runs the rest of the chain and then the handler.
    pub async fn run(self, invocation: Invocation<'_>) -> Result<()> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.invoke(invocation, Next { filters: rest }).await,
            None => {
                invocation.context.enter_handler()?;
                invocation
                    .handler
                    .call(invocation.message, invocation.context)
                    .await
            }
        }
    }
}

/// One stage around every handler call.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, invocation: Invocation<'_>, next: Next<'_>) -> Result<()>;
}

/// Turns handler panics into [`ProcessingError::Unexpected`] and logs every
/// failure with its category.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionFilter;

#[async_trait]
impl Filter for ExceptionFilter {
    fn name(&self) -> &'static str {
        "exception"
    }

    async fn invoke(&self, invocation: Invocation<'_>, next: Next<'_>) -> Result<()> {
        let message_type = invocation.message.message_type();
        let handler = invocation.handler.handler_name();

        match AssertUnwindSafe(next.run(invocation)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                tracing::debug!(
                    message_type,
                    handler,
                    kind = %err.kind(),
                    error = %err,
                    "handler failed"
                );
                Err(err)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(message_type, handler, %reason, "handler panicked");
                Err(ProcessingError::Unexpected(reason))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Checks the principal against the handler's requirements.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationFilter;

#[async_trait]
impl Filter for AuthorizationFilter {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn invoke(&self, invocation: Invocation<'_>, next: Next<'_>) -> Result<()> {
        let requirements = invocation.handler.requirements();
        authorize(invocation.context.principal(), &requirements)?;
        next.run(invocation).await
    }
}

/// Rejects messages whose own validation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationFilter;

#[async_trait]
impl Filter for ValidationFilter {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn invoke(&self, invocation: Invocation<'_>, next: Next<'_>) -> Result<()> {
        invocation.message.message().validate()?;
        next.run(invocation).await
    }
}

/// Ordered filters ending in the handler.
#[derive(Clone)]
pub struct Pipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl Pipeline {
    /// Exception handling, authorization and validation, in that order.
    pub fn standard() -> Self {
        Self {
            filters: vec![
                Arc::new(ExceptionFilter),
                Arc::new(AuthorizationFilter),
                Arc::new(ValidationFilter),
            ],
        }
    }

    /// Appends `filter` after the filters already present.
    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Filter names, outermost first.
    pub fn stages(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Runs `invocation` through every filter.
    pub async fn run(&self, invocation: Invocation<'_>) -> Result<()> {
        Next {
            filters: &self.filters,
        }
        .run(invocation)
        .await
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Audit;

    #[async_trait]
    impl Filter for Audit {
        fn name(&self) -> &'static str {
            "audit"
        }

        async fn invoke(&self, invocation: Invocation<'_>, next: Next<'_>) -> Result<()> {
            next.run(invocation).await
        }
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            Pipeline::standard().stages(),
            ["exception", "authorization", "validation"]
        );
    }

    #[test]
    fn test_custom_filters_run_closest_to_the_handler() {
        let pipeline = Pipeline::default().with_filter(Audit);

        assert_eq!(pipeline.stages().last(), Some(&"audit"));
        assert_eq!(pipeline.stages().first(), Some(&"exception"));
    }

    #[test]
    fn test_panic_payloads_are_described() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let opaque: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(from_str.as_ref()), "boom");
        assert_eq!(panic_message(from_string.as_ref()), "bang");
        assert_eq!(panic_message(opaque.as_ref()), "handler panicked");
    }
}
