//! Handlers and their registry.
//!
//! Commands and queries have exactly one handler each; registering a second
//! is a configuration error. Domain events may have any number of handlers,
//! invoked in registration order.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConfigurationError, DomainEvent, Message, Query};

use crate::auth::Requirements;
use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::Result;

/// Business logic for one message type.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync + 'static {
    async fn handle(&self, message: &M, ctx: &mut Context) -> Result<()>;

    /// What the principal must satisfy before `handle` runs.
    fn requirements(&self) -> Requirements {
        Requirements::none()
    }
}

/// Answers one query type.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    async fn handle(&self, query: &Q, ctx: &mut Context) -> Result<Q::Output>;

    fn requirements(&self) -> Requirements {
        Requirements::none()
    }
}

/// What a handler answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Command,
    Query,
    Event,
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    fn requirements(&self) -> Requirements;

    async fn call(&self, message: &MessageEnvelope, ctx: &mut Context) -> Result<()>;
}

fn downcast<M: Message>(envelope: &MessageEnvelope) -> Result<&M> {
    envelope.downcast_ref::<M>().ok_or_else(|| {
        ConfigurationError::MessageTypeMismatch {
            expected: type_name::<M>(),
            actual: envelope.type_name(),
        }
        .into()
    })
}

struct MessageAdapter<M, H> {
    handler: H,
    _message: PhantomData<fn(&M)>,
}

#[async_trait]
impl<M: Message, H: Handler<M>> ErasedHandler for MessageAdapter<M, H> {
    fn requirements(&self) -> Requirements {
        self.handler.requirements()
    }

    async fn call(&self, message: &MessageEnvelope, ctx: &mut Context) -> Result<()> {
        let message = downcast::<M>(message)?;
        self.handler.handle(message, ctx).await
    }
}

struct QueryAdapter<Q, H> {
    handler: H,
    _query: PhantomData<fn(&Q)>,
}

#[async_trait]
impl<Q: Query, H: QueryHandler<Q>> ErasedHandler for QueryAdapter<Q, H> {
    fn requirements(&self) -> Requirements {
        self.handler.requirements()
    }

    async fn call(&self, message: &MessageEnvelope, ctx: &mut Context) -> Result<()> {
        let query = downcast::<Q>(message)?;
        let output = self.handler.handle(query, ctx).await?;
        ctx.set_reply(output);
        Ok(())
    }
}

/// A registered handler, as seen by filters.
#[derive(Clone)]
pub struct Registration {
    handler: Arc<dyn ErasedHandler>,
    kind: HandlerKind,
    message_type: &'static str,
    handler_name: &'static str,
}

impl Registration {
    /// What the handler answers.
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Rust type name of the handled message.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Type name of the handler, for logs.
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// What a caller needs to reach the handler.
    pub fn requirements(&self) -> Requirements {
        self.handler.requirements()
    }

    pub(crate) async fn call(&self, message: &MessageEnvelope, ctx: &mut Context) -> Result<()> {
        self.handler.call(message, ctx).await
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("message_type", &self.message_type)
            .field("handler", &self.handler_name)
            .finish()
    }
}

/// Every handler, by message type.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    single: HashMap<TypeId, Registration>,
    events: HashMap<TypeId, Vec<Registration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler of command `M`.
    pub fn register<M: Message, H: Handler<M>>(
        &mut self,
        handler: H,
    ) -> std::result::Result<(), ConfigurationError> {
        self.insert_single(
            TypeId::of::<M>(),
            Registration {
                handler: Arc::new(MessageAdapter {
                    handler,
                    _message: PhantomData,
                }),
                kind: HandlerKind::Command,
                message_type: type_name::<M>(),
                handler_name: type_name::<H>(),
            },
        )
    }

    /// Registers the only handler for query `Q`.
    pub fn register_query<Q: Query, H: QueryHandler<Q>>(
        &mut self,
        handler: H,
    ) -> std::result::Result<(), ConfigurationError> {
        self.insert_single(
            TypeId::of::<Q>(),
            Registration {
                handler: Arc::new(QueryAdapter {
                    handler,
                    _query: PhantomData,
                }),
                kind: HandlerKind::Query,
                message_type: type_name::<Q>(),
                handler_name: type_name::<H>(),
            },
        )
    }

    /// Adds a handler for event `E` after any already registered.
    pub fn register_event<E: DomainEvent, H: Handler<E>>(&mut self, handler: H) {
        self.events
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Registration {
                handler: Arc::new(MessageAdapter {
                    handler,
                    _message: PhantomData,
                }),
                kind: HandlerKind::Event,
                message_type: type_name::<E>(),
                handler_name: type_name::<H>(),
            });
    }

    fn insert_single(
        &mut self,
        type_id: TypeId,
        registration: Registration,
    ) -> std::result::Result<(), ConfigurationError> {
        if self.single.contains_key(&type_id) {
            return Err(ConfigurationError::DuplicateHandler {
                message_type: registration.message_type,
            });
        }
        self.single.insert(type_id, registration);
        Ok(())
    }

    /// The command or query handler for a message type.
    pub fn handler_for(&self, type_id: TypeId) -> Option<&Registration> {
        self.single.get(&type_id)
    }

    /// Handlers for an event type, in registration order.
    pub fn event_handlers(&self, type_id: TypeId) -> &[Registration] {
        self.events.get(&type_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.single.len() + self.events.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
