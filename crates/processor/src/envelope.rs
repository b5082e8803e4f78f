use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use domain::Message;

/// A message with its concrete type erased, as it travels through the
/// pipeline.
#[derive(Clone)]
pub struct MessageEnvelope {
    message: Arc<dyn Message>,
    any: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl MessageEnvelope {
    /// Wraps `message`.
    pub fn new<M: Message>(message: M) -> Self {
        let message = Arc::new(message);
        Self {
            message: Arc::clone(&message) as Arc<dyn Message>,
            any: message,
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
        }
    }

    /// The wrapped message.
    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    /// The message's own routing name.
    pub fn message_type(&self) -> &'static str {
        self.message.message_type()
    }

    /// Type of the wrapped message, used for handler lookup.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// True when the wrapped message is an `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }

    /// The wrapped message as an `M`.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.any.downcast_ref::<M>()
    }
}

impl fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("message_type", &self.message_type())
            .field("message", &self.message)
            .finish()
    }
}
