use crate::adapters::pubsub::{PubSub, PubSubEvent, PubSubMessage};
use crate::config::PubSubConfig;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::Instrument;

#[derive(Debug)]
pub struct RedisClient {
    publisher: redis::aio::ConnectionManager,
    // Maps patterns (e.g. "parley:conversation:*") to broadcast senders
    subscriptions: Arc<DashMap<String, broadcast::Sender<PubSubEvent>>>,
    client: redis::Client,
    shutdown: watch::Receiver<bool>,
    config: PubSubConfig,
}

impl RedisClient {
    /// Creates a new Redis-based `PubSub` client.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn new(url: &str, config: &PubSubConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<Arc<Self>> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        let subscriptions = Arc::new(DashMap::new());

        Ok(Arc::new(Self { publisher, subscriptions, client, shutdown, config: config.clone() }))
    }

    async fn run_pattern_listener(
        client: redis::Client,
        pattern: String,
        tx: broadcast::Sender<PubSubEvent>,
        mut shutdown: watch::Receiver<bool>,
        subscriptions: Arc<DashMap<String, broadcast::Sender<PubSubEvent>>>,
        config: PubSubConfig,
        ready_tx: oneshot::Sender<()>,
    ) {
        let retry_strategy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(config.min_backoff_secs))
            .with_max_delay(Duration::from_secs(config.max_backoff_secs));

        let mut ready_tx = Some(ready_tx);

        loop {
            let pubsub_result = (|| async {
                let mut pubsub = client.get_async_pubsub().await?;
                pubsub.psubscribe(&pattern).await?;
                Ok::<redis::aio::PubSub, redis::RedisError>(pubsub)
            })
            .retry(&retry_strategy)
            .when(|e| {
                tracing::warn!(error = %e, "Failed to subscribe to pubsub, retrying...");
                true
            })
            .notify(|e, duration| {
                tracing::debug!("Pubsub subscription retry in {:?} due to error: {:?}", duration, e);
            })
            .await;

            let pubsub = match pubsub_result {
                Ok(ps) => ps,
                Err(e) => {
                    tracing::error!(error = %e, "Pubsub subscription failed after retries");
                    break;
                }
            };

            tracing::info!(pattern = %pattern, "Successfully subscribed to pubsub");
            if let Some(rtx) = ready_tx.take() {
                let _ = rtx.send(());
            } else {
                // Messages published while disconnected are gone; subscribers must resync.
                let _ = tx.send(PubSubEvent::Reconnected);
            }

            let mut message_stream = pubsub.into_on_message();

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        subscriptions.remove(&pattern);
                        return;
                    }
                    msg = message_stream.next() => {
                        if let Some(msg) = msg {
                            let channel = msg.get_channel_name().to_string();
                            let payload: Vec<u8> = msg.get_payload().unwrap_or_default();
                            // No receivers simply means nobody on this node is listening right now.
                            let _ = tx.send(PubSubEvent::Message(PubSubMessage { channel, payload: payload.into() }));
                        } else {
                            tracing::warn!(pattern = %pattern, "Pubsub connection lost, reconnecting...");
                            break;
                        }
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        subscriptions.remove(&pattern);
    }
}

#[async_trait]
impl PubSub for RedisClient {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, i64>(channel, payload).await?;
        Ok(())
    }

    /// Subscribes to a Redis pattern.
    /// If a background listener for this pattern isn't already running, it will be started.
    async fn subscribe(&self, pattern: &str) -> anyhow::Result<broadcast::Receiver<PubSubEvent>> {
        if let Some(tx) = self.subscriptions.get(pattern) {
            return Ok(tx.subscribe());
        }

        let (tx, rx) = broadcast::channel(self.config.channel_capacity);
        self.subscriptions.insert(pattern.to_string(), tx.clone());

        let pattern_str = pattern.to_string();
        let client = self.client.clone();
        let shutdown = self.shutdown.clone();
        let subscriptions = Arc::clone(&self.subscriptions);
        let config = self.config.clone();

        // Resolved once the first PSUBSCRIBE succeeds; dropped if the listener gives up.
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(
            async move {
                Self::run_pattern_listener(client, pattern_str, tx, shutdown, subscriptions, config, ready_tx).await;
            }
            .instrument(tracing::info_span!("pubsub_listener", pattern = %pattern)),
        );

        ready_rx.await.map_err(|_| anyhow::anyhow!("pubsub subscription to {pattern} failed"))?;

        Ok(rx)
    }

    /// Pings the Redis server to check connectivity.
    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.publisher.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
