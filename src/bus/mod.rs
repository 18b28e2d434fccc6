//! Message bus abstraction
//!
//! Engines receive an injected bus handle instead of sharing a process-wide
//! dispatcher; each engine owns its subscriptions and tears them down at
//! unmount. Inbound messages fan out through a tokio broadcast channel.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

pub mod mqtt;

pub use mqtt::MqttBus;

const CHANNEL_CAPACITY: usize = 256;

/// One inbound or outbound message: topic plus opaque payload. Payloads are
/// interpreted per-signal by the telemetry layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// Topic-based pub/sub client.
///
/// `subscribe`/`unsubscribe` must pair symmetrically: whatever set of topics a
/// component registers at setup it must deregister at teardown, otherwise the
/// broker keeps delivering to a listener nobody drains.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<()>;
    async fn unsubscribe(&self, topic: &str) -> Result<()>;
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Receiver of every message delivered on subscribed topics.
    fn messages(&self) -> broadcast::Receiver<BusMessage>;
}

/// Shared bus handle.
pub type SharedBus = Arc<dyn MessageBus>;

/// In-process bus used by tests and broker-less demos.
///
/// Behaves like a broker: `deliver` only reaches receivers when the topic has
/// at least one subscription, and outbound publishes are recorded for
/// inspection.
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    subscriptions: RwLock<HashMap<String, usize>>,
    published: RwLock<Vec<BusMessage>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            subscriptions: RwLock::new(HashMap::new()),
            published: RwLock::new(Vec::new()),
        }
    }

    /// Inject an inbound message, as if the broker delivered it. Dropped when
    /// nothing is subscribed to the topic.
    pub async fn deliver(&self, topic: &str, payload: &str) {
        let subscribed = self
            .subscriptions
            .read()
            .await
            .get(topic)
            .copied()
            .unwrap_or(0)
            > 0;
        if !subscribed {
            return;
        }
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Topics with at least one live subscription.
    pub async fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Everything published through this bus, in order.
    pub async fn published(&self) -> Vec<BusMessage> {
        self.published.read().await.clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        *self
            .subscriptions
            .write()
            .await
            .entry(topic.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(count) = subscriptions.get_mut(topic) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subscriptions.remove(topic);
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        self.published.write().await.push(message.clone());

        // Loop back to any local subscriber, like a broker would.
        let subscribed = self
            .subscriptions
            .read()
            .await
            .get(topic)
            .copied()
            .unwrap_or(0)
            > 0;
        if subscribed {
            let _ = self.sender.send(message);
        }
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}
