//! Messenger
//!
//! One per process. Publishes messages, issues RPC requests, and routes every
//! inbound frame either to a waiting request or to the variant's handler.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::dispatch::{DispatchResult, Dispatcher, MessageContext, MessageHandler};
use super::pending::{PendingRequest, PendingTable, Resolution};
use super::{RpcError, RpcResult};
use crate::bus::{Subscription, Transport};
use crate::config::{BusConfig, CodecConfig, Config, RpcConfig};
use crate::protocol::{
    CorrelationId, Envelope, EnvelopeFrame, Message, MessageKind, Request, Variant,
};
use crate::registry::{Registry, RegistryError};

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Completed a waiting request
    Resolved(CorrelationId),
    /// Completed a waiting request with a correlation type error
    CorrelationFailed(CorrelationId),
    /// Response for a request that already settled; dropped
    Late(CorrelationId),
    /// Handed to the variant's handler
    Dispatched(MessageKind),
    /// No handler registered for this variant
    Unhandled(MessageKind),
    /// Frame could not be decoded and was skipped
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MalformedFrame,
    UnknownTag,
    SchemaMismatch,
    /// A handler exists but no Tokio runtime is available to run it
    NoRuntime,
}

/// Messenger counters
#[derive(Debug, Default)]
pub struct MessengerStats {
    pub published: AtomicU64,
    pub received: AtomicU64,
    pub dispatched: AtomicU64,
    pub resolved: AtomicU64,
    pub late_responses: AtomicU64,
    pub unknown_tags: AtomicU64,
    pub schema_mismatches: AtomicU64,
    pub malformed_frames: AtomicU64,
}

/// Point-in-time copy of [`MessengerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub published: u64,
    pub received: u64,
    pub dispatched: u64,
    pub resolved: u64,
    pub late_responses: u64,
    pub unknown_tags: u64,
    pub schema_mismatches: u64,
    pub malformed_frames: u64,
}

impl MessengerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            unknown_tags: self.unknown_tags.load(Ordering::Relaxed),
            schema_mismatches: self.schema_mismatches.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct MessengerInner {
    node_id: Uuid,
    node_topic: String,
    reply_topic: String,
    bus: BusConfig,
    rpc: RpcConfig,
    codec: CodecConfig,
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    pending: Arc<PendingTable>,
    dispatcher: Dispatcher,
    stats: MessengerStats,
    runtime: Option<Handle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable handle on the process's messaging layer
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

impl Messenger {
    /// Build a messenger. When called inside a Tokio runtime, handlers are
    /// spawned on that runtime even if frames arrive from another thread.
    pub fn new(config: &Config, registry: Arc<Registry>, transport: Arc<dyn Transport>) -> Self {
        let node_id = config.node_id();
        Self {
            inner: Arc::new(MessengerInner {
                node_id,
                node_topic: config.bus.node_topic(&node_id),
                reply_topic: config.bus.reply_topic(&node_id),
                bus: config.bus.clone(),
                rpc: config.rpc.clone(),
                codec: config.codec.clone(),
                registry,
                transport,
                pending: Arc::new(PendingTable::new(config.rpc.settled_history)),
                dispatcher: Dispatcher::new(),
                stats: MessengerStats::default(),
                runtime: Handle::try_current().ok(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.inner.node_id
    }

    /// Topic other processes use to address this node directly
    pub fn node_topic(&self) -> &str {
        &self.inner.node_topic
    }

    /// Topic this node receives RPC responses on
    pub fn reply_topic(&self) -> &str {
        &self.inner.reply_topic
    }

    pub fn broadcast_topic(&self) -> &str {
        &self.inner.bus.broadcast_topic
    }

    /// Direct topic of another node
    pub fn topic_of(&self, node_id: &Uuid) -> String {
        self.inner.bus.node_topic(node_id)
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn pending(&self) -> &PendingTable {
        &self.inner.pending
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Register the handler for variant `T`
    pub fn handle<T, F, Fut>(&self, handler: F) -> DispatchResult<()>
    where
        T: Variant,
        F: Fn(T, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.dispatcher.register_fn(handler)
    }

    pub fn register_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> DispatchResult<()> {
        self.inner.dispatcher.register(kind, handler)
    }

    /// Fire-and-forget publish on the broadcast topic
    pub async fn publish(&self, message: impl Into<Message>) -> RpcResult<()> {
        let topic = self.inner.bus.broadcast_topic.clone();
        self.publish_to(&topic, message).await
    }

    /// Fire-and-forget publish on a specific topic
    pub async fn publish_to(&self, topic: &str, message: impl Into<Message>) -> RpcResult<()> {
        self.send_envelope(topic, &Envelope::new(message)).await
    }

    async fn send_envelope(&self, topic: &str, envelope: &Envelope) -> RpcResult<()> {
        let frame = self
            .inner
            .registry
            .encode_envelope(envelope, self.inner.codec.body_format)?;
        let bytes = frame.to_bytes()?;

        tracing::debug!(
            "Publishing {} to {} ({} bytes)",
            envelope.message.kind(),
            topic,
            bytes.len()
        );
        self.inner.transport.publish(topic, bytes).await?;
        bump(&self.inner.stats.published);
        Ok(())
    }

    /// Send `message` as an RPC request and return the handle to await.
    ///
    /// The response must be an `expected` message carrying the same
    /// correlation id; it is delivered on this node's reply topic.
    pub async fn send_request(
        &self,
        topic: &str,
        message: impl Into<Message>,
        expected: MessageKind,
        timeout: Duration,
    ) -> RpcResult<PendingRequest> {
        let request = self.inner.pending.insert(expected, timeout);
        let envelope = Envelope::new(message)
            .with_correlation(request.correlation_id())
            .with_reply_to(self.inner.reply_topic.clone());

        // Dropping the handle on error removes the pending entry
        self.send_envelope(topic, &envelope).await?;
        Ok(request)
    }

    /// Typed request/response round trip
    pub async fn request<R: Request>(
        &self,
        topic: &str,
        request: R,
        timeout: Option<Duration>,
    ) -> RpcResult<R::Response> {
        let timeout = timeout.unwrap_or_else(|| self.inner.rpc.default_timeout());
        let pending = self
            .send_request(topic, request, R::Response::KIND, timeout)
            .await?;
        let message = pending.wait().await?;
        R::Response::from_message(message).map_err(|other| RpcError::UnexpectedResponse(other.kind()))
    }

    /// Answer an inbound message on its reply topic, reusing its correlation id
    pub async fn reply(&self, ctx: &MessageContext, message: impl Into<Message>) -> RpcResult<()> {
        let (Some(correlation_id), Some(reply_to)) = (ctx.correlation_id, ctx.reply_to.as_deref()) else {
            return Err(RpcError::NoReplyTarget);
        };
        let envelope = Envelope::new(message).with_correlation(correlation_id);
        self.send_envelope(reply_to, &envelope).await
    }

    /// Handle one raw frame from the transport. Failures stay scoped to this frame.
    ///
    /// Handlers run as tasks on the messenger's runtime, or on the caller's
    /// current runtime. With neither, the frame is skipped with
    /// [`SkipReason::NoRuntime`].
    pub fn on_frame(&self, bytes: &[u8]) -> Delivery {
        bump(&self.inner.stats.received);

        let frame = match EnvelopeFrame::decode(bytes, self.inner.codec.max_frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                bump(&self.inner.stats.malformed_frames);
                tracing::warn!("Dropping malformed frame: {}", e);
                return Delivery::Skipped(SkipReason::MalformedFrame);
            }
        };

        let envelope = match self.inner.registry.decode_frame(&frame) {
            Ok(envelope) => envelope,
            Err(RegistryError::UnknownTag(tag)) => {
                bump(&self.inner.stats.unknown_tags);
                tracing::debug!("Skipping message with unknown tag {}", tag);
                return Delivery::Skipped(SkipReason::UnknownTag);
            }
            Err(e) => {
                bump(&self.inner.stats.schema_mismatches);
                tracing::warn!("Skipping message: {}", e);
                return Delivery::Skipped(SkipReason::SchemaMismatch);
            }
        };

        self.route(envelope, frame.tag)
    }

    /// Route a decoded envelope to a pending request or a handler.
    /// Runtime requirements are those of [`Messenger::on_frame`].
    pub fn on_message_received(&self, envelope: Envelope) -> Delivery {
        let tag = envelope.message.tag().to_string();
        self.route(envelope, tag)
    }

    fn route(&self, envelope: Envelope, tag: String) -> Delivery {
        let Envelope {
            message,
            correlation_id,
            reply_to,
        } = envelope;

        // Requests carry a reply topic; responses never do
        if let (Some(id), None) = (correlation_id, &reply_to) {
            match self.inner.pending.resolve(id, message.clone()) {
                Resolution::Resolved => {
                    bump(&self.inner.stats.resolved);
                    return Delivery::Resolved(id);
                }
                Resolution::Mismatch { expected, actual } => {
                    tracing::error!(
                        "Request {} expected {} but was answered with {}",
                        id,
                        expected,
                        actual
                    );
                    return Delivery::CorrelationFailed(id);
                }
                Resolution::Late(settlement) => {
                    bump(&self.inner.stats.late_responses);
                    tracing::debug!(
                        "Dropping {} for request {} ({:?})",
                        message.kind(),
                        id,
                        settlement
                    );
                    return Delivery::Late(id);
                }
                Resolution::Unknown => {}
            }
        }

        self.dispatch(message, MessageContext::new(tag, correlation_id, reply_to, self.clone()))
    }

    fn dispatch(&self, message: Message, ctx: MessageContext) -> Delivery {
        let kind = message.kind();
        let Some(handler) = self.inner.dispatcher.get(kind) else {
            tracing::trace!("No handler for {}", kind);
            return Delivery::Unhandled(kind);
        };

        let Some(runtime) = self.inner.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!("No runtime to run the {} handler, skipping", kind);
            return Delivery::Skipped(SkipReason::NoRuntime);
        };

        bump(&self.inner.stats.dispatched);
        tracing::debug!("Dispatching {}", kind);
        runtime.spawn(async move {
            handler.handle(message, ctx).await;
        });
        Delivery::Dispatched(kind)
    }

    /// Subscribe to the broadcast, node and reply topics and start routing
    pub async fn start(&self) -> RpcResult<()> {
        let topics = [
            self.inner.bus.broadcast_topic.clone(),
            self.inner.node_topic.clone(),
            self.inner.reply_topic.clone(),
        ];

        for topic in topics {
            let subscription = self.inner.transport.subscribe(&topic).await?;
            let task = tokio::spawn(receive_loop(Arc::downgrade(&self.inner), subscription));
            self.inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task);
        }

        tracing::info!("Messenger {} listening on {}", self.inner.node_id, self.inner.node_topic);
        Ok(())
    }

    /// Stop all receive loops
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in &tasks {
            task.abort();
        }
        tracing::info!("Messenger {} stopped", self.inner.node_id);
    }
}

async fn receive_loop(inner: Weak<MessengerInner>, mut subscription: Subscription) {
    while let Some(bytes) = subscription.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Messenger { inner }.on_frame(&bytes);
    }
    tracing::debug!("Subscription to {} ended", subscription.topic());
}
