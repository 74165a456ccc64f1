//! Bus module - Boundary to the publish/subscribe transport
//!
//! Provides:
//! - The `Transport` trait a broker client implements
//! - `InMemoryBus`, an in-process broker for tests and local runs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A stream of frames delivered on one topic
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::Receiver<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next frame, or `None` once the transport drops the subscription
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe transport. Delivery order and guarantees are the
/// implementation's contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one encoded frame to every subscriber of `topic`
    async fn publish(&self, topic: &str, frame: Bytes) -> TransportResult<()>;

    /// Start receiving frames published to `topic`
    async fn subscribe(&self, topic: &str) -> TransportResult<Subscription>;
}

/// In-process broker, one fan-out list per topic
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Bytes>>>>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|s| !s.is_closed()).count())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn publish(&self, topic: &str, frame: Bytes) -> TransportResult<()> {
        if topic.is_empty() {
            return Err(TransportError::Publish {
                topic: String::new(),
                reason: "empty topic name".into(),
            });
        }

        let subscribers = {
            let topics = self.topics.read().await;
            topics.get(topic).cloned().unwrap_or_default()
        };

        if subscribers.is_empty() {
            tracing::trace!("No subscribers on {}, frame dropped", topic);
            return Ok(());
        }

        let mut closed = 0;
        for subscriber in &subscribers {
            if subscriber.send(frame.clone()).await.is_err() {
                closed += 1;
            }
        }

        if closed > 0 {
            let mut topics = self.topics.write().await;
            if let Some(subs) = topics.get_mut(topic) {
                subs.retain(|s| !s.is_closed());
            }
            tracing::debug!("Pruned {} closed subscribers from {}", closed, topic);
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> TransportResult<Subscription> {
        if topic.is_empty() {
            return Err(TransportError::Subscribe {
                topic: String::new(),
                reason: "empty topic name".into(),
            });
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let mut topics = self.topics.write().await;
        topics.entry(topic.to_string()).or_default().push(tx);
        tracing::debug!("Subscribed to {}", topic);
        Ok(Subscription::new(topic, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out() {
        let bus = InMemoryBus::new(8);
        let mut a = bus.subscribe("games").await.unwrap();
        let mut b = bus.subscribe("games").await.unwrap();
        let mut other = bus.subscribe("friends").await.unwrap();

        bus.publish("games", Bytes::from_static(b"frame")).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert!(other.receiver.try_recv().is_err());
        assert_eq!(a.topic(), "games");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InMemoryBus::default();
        tokio_test::assert_ok!(bus.publish("nobody", Bytes::new()).await);
    }

    #[tokio::test]
    async fn test_empty_topic_is_rejected() {
        let bus = InMemoryBus::default();
        let err = tokio_test::assert_err!(bus.subscribe("").await);
        assert!(matches!(err, TransportError::Subscribe { .. }));
        let err = tokio_test::assert_err!(bus.publish("", Bytes::new()).await);
        assert!(matches!(err, TransportError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = InMemoryBus::new(8);
        let kept = bus.subscribe("games").await.unwrap();
        drop(bus.subscribe("games").await.unwrap());

        bus.publish("games", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(bus.subscriber_count("games").await, 1);
        drop(kept);
        assert_eq!(bus.subscriber_count("games").await, 0);
    }
}
