use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubEvent {
    Message(PubSubMessage),
    /// The underlying subscription was re-established. Anything published in between is lost.
    Reconnected,
}

/// Channel-based fan-out between nodes.
#[async_trait]
pub trait PubSub: Send + Sync + Debug {
    /// # Errors
    /// Returns an error if the bus is unreachable.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()>;

    /// Subscribes to every channel matching `pattern`. A trailing `*` matches any suffix.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be established.
    async fn subscribe(&self, pattern: &str) -> anyhow::Result<broadcast::Receiver<PubSubEvent>>;

    /// # Errors
    /// Returns an error if the bus is unreachable.
    async fn ping(&self) -> anyhow::Result<()>;
}

#[must_use]
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    pattern.strip_suffix('*').map_or(pattern == channel, |prefix| channel.starts_with(prefix))
}

/// In-process bus for single-node deployments and tests.
#[derive(Debug)]
pub struct LocalPubSub {
    patterns: DashMap<String, broadcast::Sender<PubSubEvent>>,
    channel_capacity: usize,
    available: AtomicBool,
}

impl LocalPubSub {
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self { patterns: DashMap::new(), channel_capacity, available: AtomicBool::new(true) }
    }

    /// Marks the bus reachable or unreachable. While unreachable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Tells every pattern subscriber its subscription was re-established.
    pub fn announce_reconnect(&self) {
        for entry in &self.patterns {
            let _ = entry.value().send(PubSubEvent::Reconnected);
        }
    }

    /// Drops every pattern subscription, closing the receivers handed out so far.
    pub fn disconnect(&self) {
        self.patterns.clear();
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("local pubsub unavailable"))
        }
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.ensure_available()?;
        let payload: Arc<[u8]> = payload.into();
        for entry in &self.patterns {
            if pattern_matches(entry.key(), channel) {
                let message = PubSubMessage { channel: channel.to_string(), payload: Arc::clone(&payload) };
                let _ = entry.value().send(PubSubEvent::Message(message));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> anyhow::Result<broadcast::Receiver<PubSubEvent>> {
        self.ensure_available()?;
        let tx = self
            .patterns
            .entry(pattern.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .value()
            .clone();
        Ok(tx.subscribe())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.ensure_available()
    }
}
