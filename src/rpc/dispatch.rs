//! Handler dispatch
//!
//! Each variant has at most one handler per process. Variants without a
//! handler are ignored.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use super::Messenger;
use crate::protocol::{CorrelationId, Message, MessageKind, Variant};

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("A handler for {0} is already registered")]
    HandlerExists(MessageKind),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Metadata of an inbound message, and the way to answer it
#[derive(Clone)]
pub struct MessageContext {
    /// Tag the message arrived under
    pub tag: String,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<String>,
    messenger: Messenger,
}

impl MessageContext {
    pub(crate) fn new(
        tag: String,
        correlation_id: Option<CorrelationId>,
        reply_to: Option<String>,
        messenger: Messenger,
    ) -> Self {
        Self {
            tag,
            correlation_id,
            reply_to,
            messenger,
        }
    }

    /// Whether the sender is waiting for a response
    pub fn expects_reply(&self) -> bool {
        self.correlation_id.is_some() && self.reply_to.is_some()
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Answer the message on the sender's reply topic
    pub async fn reply(&self, message: impl Into<Message>) -> super::RpcResult<()> {
        self.messenger.reply(self, message).await
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("tag", &self.tag)
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .finish()
    }
}

/// Business logic reacting to one variant
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message, ctx: MessageContext);
}

/// Adapts a typed async closure to [`MessageHandler`]
struct FnHandler<T, F> {
    handler: F,
    _variant: PhantomData<fn(T)>,
}

#[async_trait]
impl<T, F, Fut> MessageHandler for FnHandler<T, F>
where
    T: Variant,
    F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: Message, ctx: MessageContext) {
        match T::from_message(message) {
            Ok(value) => (self.handler)(value, ctx).await,
            Err(other) => {
                tracing::error!("Handler for {} received {}", T::KIND, other.kind());
            }
        }
    }
}

/// Handler table
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> DispatchResult<()> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&kind) {
            return Err(DispatchError::HandlerExists(kind));
        }
        handlers.insert(kind, handler);
        tracing::debug!("Handler registered for {}", kind);
        Ok(())
    }

    pub fn register_fn<T, F, Fut>(&self, handler: F) -> DispatchResult<()>
    where
        T: Variant,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = FnHandler {
            handler,
            _variant: PhantomData,
        };
        self.register(T::KIND, Arc::new(handler))
    }

    pub fn unregister(&self, kind: MessageKind) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.remove(&kind).is_some()
    }

    pub fn get(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
