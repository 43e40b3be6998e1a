use crate::adapters::pubsub::{PubSub, PubSubEvent};
use crate::config::NotificationConfig;
use crate::domain::event::{ConversationChange, SubscriptionEvent};
use crate::domain::message::Message;
use crate::error::{AppError, Result};
use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

mod handle;

use handle::{HandleShared, RouteEvent};
pub use handle::{SubscriptionHandle, SubscriptionState};

type Routes = Arc<DashMap<String, broadcast::Sender<RouteEvent>>>;

#[derive(Clone, Debug)]
struct Metrics {
    publishes_total: Counter<u64>,
    received_total: Counter<u64>,
    unrouted_total: Counter<u64>,
    resyncs_total: Counter<u64>,
    upstream_losses_total: Counter<u64>,
    callbacks_total: Counter<u64>,
    decode_failures_total: Counter<u64>,
    active_routes: UpDownCounter<i64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            publishes_total: meter
                .u64_counter("subscription_publishes_total")
                .with_description("Total notification publish attempts")
                .build(),
            received_total: meter
                .u64_counter("subscription_received_total")
                .with_description("Total notifications received from PubSub")
                .build(),
            unrouted_total: meter
                .u64_counter("subscription_unrouted_total")
                .with_description("Notifications received from PubSub with no local subscribers")
                .build(),
            resyncs_total: meter
                .u64_counter("subscription_resyncs_total")
                .with_description("Activation signals fanned out after reconnects or lag")
                .build(),
            upstream_losses_total: meter
                .u64_counter("subscription_upstream_losses_total")
                .with_description("Upstream pattern subscriptions that closed underneath the dispatcher")
                .build(),
            callbacks_total: meter
                .u64_counter("subscription_callbacks_total")
                .with_description("Total callback invocations across all handles")
                .build(),
            decode_failures_total: meter
                .u64_counter("subscription_decode_failures_total")
                .with_description("Payloads that could not be decoded for a subscriber")
                .build(),
            active_routes: meter
                .i64_up_down_counter("subscription_active_routes")
                .with_description("Number of active local routes")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("subscription_gc_duration_seconds")
                .with_description("Time taken to perform a single GC iteration")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("subscription_gc_reclaimed_total")
                .with_description("Total number of stale routes reclaimed by GC")
                .build(),
        }
    }
}

/// One establishment of the upstream pattern subscriptions. Dropping it stops its dispatchers.
#[derive(Debug)]
struct Link {
    generation: u64,
    _stop: watch::Sender<()>,
}

/// Upstream side of the manager: the pattern subscriptions and the dispatchers feeding the routes.
#[derive(Clone, Debug)]
struct Upstream {
    pubsub: Arc<dyn PubSub>,
    routes: Routes,
    metrics: Metrics,
    config: NotificationConfig,
    link: Arc<Mutex<Option<Link>>>,
    generations: Arc<AtomicU64>,
    lost: mpsc::UnboundedSender<u64>,
    shutdown: watch::Receiver<bool>,
}

impl Upstream {
    fn patterns(&self) -> [String; 2] {
        [format!("{}*", self.config.message_channel_prefix), self.config.directory_channel.clone()]
    }

    /// Establishes the pattern subscriptions unless a live link already exists.
    async fn ensure(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.is_none() {
            *link = Some(self.establish().await?);
        }
        Ok(())
    }

    async fn establish(&self) -> Result<Link> {
        // Every pattern must be subscribed before any dispatcher starts, or a partial failure
        // would leave a dispatcher behind that the next attempt duplicates.
        let mut receivers = Vec::with_capacity(2);
        for pattern in self.patterns() {
            let rx = self.pubsub.subscribe(&pattern).await.map_err(|e| {
                tracing::error!(error = %e, pattern = %pattern, "Failed to establish subscription");
                AppError::Subscription(e.to_string())
            })?;
            receivers.push((pattern, rx));
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (stop, stop_rx) = watch::channel(());
        for (pattern, rx) in receivers {
            tokio::spawn(
                self.clone()
                    .run_dispatcher(rx, generation, stop_rx.clone())
                    .instrument(tracing::info_span!("subscription_dispatcher", pattern = %pattern, generation)),
            );
        }

        Ok(Link { generation, _stop: stop })
    }

    fn resync_all(&self) {
        for route in self.routes.iter() {
            let _ = route.value().send(SubscriptionEvent::Activated);
        }
        self.metrics.resyncs_total.add(1, &[]);
    }

    async fn run_dispatcher(
        self,
        mut rx: broadcast::Receiver<PubSubEvent>,
        generation: u64,
        mut stop: watch::Receiver<()>,
    ) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                // Only ever fires once the link is dropped.
                _ = stop.changed() => return,
                event = rx.recv() => {
                    match event {
                        Ok(PubSubEvent::Message(msg)) => {
                            self.metrics.received_total.add(1, &[]);
                            if let Some(tx) = self.routes.get(&msg.channel) {
                                let _ = tx.send(SubscriptionEvent::Event(msg.payload));
                            } else {
                                self.metrics.unrouted_total.add(1, &[]);
                            }
                        }
                        Ok(PubSubEvent::Reconnected) => {
                            tracing::info!("PubSub reconnected, resyncing subscribers");
                            self.resync_all();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "PubSub dispatcher lagged, resyncing subscribers");
                            self.resync_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            let _ = self.lost.send(generation);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn run_supervisor(self, mut lost: mpsc::UnboundedReceiver<u64>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                generation = lost.recv() => {
                    let Some(generation) = generation else { break };
                    self.recover(generation).await;
                }
            }
        }
    }

    /// Replaces a closed link. Live routes resync once it is back, or are failed if it never is.
    async fn recover(&self, generation: u64) {
        {
            let mut link = self.link.lock().await;
            match link.as_ref() {
                Some(current) if current.generation == generation => {
                    link.take();
                }
                // A sibling dispatcher or a later subscribe already replaced it.
                _ => return,
            }
        }

        if *self.shutdown.borrow() {
            return;
        }

        tracing::warn!(generation, "PubSub subscription closed, re-establishing");
        self.metrics.upstream_losses_total.add(1, &[]);

        let retry_strategy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.config.resubscribe_min_backoff_ms))
            .with_max_times(self.config.resubscribe_max_times);

        let result = (|| self.ensure())
            .retry(&retry_strategy)
            .when(AppError::is_retryable)
            .notify(|e, duration| {
                tracing::debug!("Re-establishing subscription in {:?} due to error: {}", duration, e);
            })
            .await;

        match result {
            Ok(()) => self.resync_all(),
            Err(e) => {
                tracing::error!(error = %e, "Giving up on upstream subscription, failing live handles");
                self.fail_routes();
            }
        }
    }

    // Dropping a route's sender closes every receiver on it; their handles become `Unsubscribed`.
    fn fail_routes(&self) {
        let failed = self.routes.len();
        self.routes.clear();
        self.metrics.active_routes.add(-i64::try_from(failed).unwrap_or(i64::MAX), &[]);
    }
}

/// Routes pub/sub notifications to caller-owned [`SubscriptionHandle`]s.
///
/// One local route exists per subscribed channel; every handle on the channel owns a receiver
/// on it and a delivery task that drives its callback. The upstream pattern subscriptions are
/// established lazily by the first `subscribe_*` call, and again after the bus closes them.
#[derive(Debug)]
pub struct SubscriptionManager {
    upstream: Upstream,
    config: NotificationConfig,
    metrics: Metrics,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(pubsub: Arc<dyn PubSub>, config: &NotificationConfig, shutdown: watch::Receiver<bool>) -> Self {
        let routes: Routes = Arc::new(DashMap::new());
        let metrics = Metrics::new();

        tokio::spawn(
            Self::run_gc(Arc::clone(&routes), metrics.clone(), config.gc_interval_secs, shutdown.clone())
                .instrument(tracing::info_span!("subscription_gc")),
        );

        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let upstream = Upstream {
            pubsub,
            routes,
            metrics: metrics.clone(),
            config: config.clone(),
            link: Arc::new(Mutex::new(None)),
            generations: Arc::new(AtomicU64::new(0)),
            lost: lost_tx,
            shutdown,
        };

        tokio::spawn(
            upstream.clone().run_supervisor(lost_rx).instrument(tracing::info_span!("subscription_supervisor")),
        );

        Self { upstream, config: config.clone(), metrics }
    }

    #[must_use]
    pub fn message_channel(&self, conversation_id: Uuid) -> String {
        format!("{}{conversation_id}", self.config.message_channel_prefix)
    }

    /// Number of local routes currently held.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.upstream.routes.len()
    }

    /// Delivers every message inserted into `conversation_id`, at least once.
    ///
    /// # Errors
    /// Returns `AppError::Subscription` if the channel cannot be established.
    #[tracing::instrument(skip(self, on_message))]
    pub async fn subscribe_messages<F>(&self, conversation_id: Uuid, on_message: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(SubscriptionEvent<Message>) + Send + 'static,
    {
        self.subscribe(self.message_channel(conversation_id), on_message).await
    }

    /// Delivers a change signal whenever any conversation is created or updated.
    ///
    /// # Errors
    /// Returns `AppError::Subscription` if the channel cannot be established.
    #[tracing::instrument(skip(self, on_change))]
    pub async fn subscribe_conversations<F>(&self, on_change: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(SubscriptionEvent<ConversationChange>) + Send + 'static,
    {
        self.subscribe(self.config.directory_channel.clone(), on_change).await
    }

    /// # Errors
    /// Returns an error if the message cannot be published.
    pub async fn publish_message(&self, message: &Message) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.upstream.pubsub.publish(&self.message_channel(message.conversation_id), payload).await
    }

    /// # Errors
    /// Returns an error if the change signal cannot be published.
    pub async fn publish_change(&self, change: ConversationChange) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&change)?;
        self.upstream.pubsub.publish(&self.config.directory_channel, payload).await
    }

    /// Publishes a new message, logging instead of failing. The write it announces is already durable.
    #[tracing::instrument(skip(self, message), fields(conversation_id = %message.conversation_id, message_id = message.id))]
    pub async fn notify_message(&self, message: &Message) {
        let result = self.publish_message(message).await;
        self.record_publish(result);
    }

    #[tracing::instrument(skip(self), fields(conversation_id = %change.conversation_id))]
    pub async fn notify_change(&self, change: ConversationChange) {
        let result = self.publish_change(change).await;
        self.record_publish(result);
    }

    fn record_publish(&self, result: anyhow::Result<()>) {
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to publish to PubSub");
            self.metrics.publishes_total.add(1, &[KeyValue::new("status", "error")]);
        } else {
            self.metrics.publishes_total.add(1, &[KeyValue::new("status", "sent")]);
        }
    }

    async fn subscribe<T, F>(&self, channel: String, mut on_event: F) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + 'static,
        F: FnMut(SubscriptionEvent<T>) + Send + 'static,
    {
        let decode_failures = self.metrics.decode_failures_total.clone();
        let decode_channel = channel.clone();
        let callback = Box::new(move |event: RouteEvent| match event {
            SubscriptionEvent::Activated => on_event(SubscriptionEvent::Activated),
            SubscriptionEvent::Event(payload) => match serde_json::from_slice::<T>(&payload) {
                Ok(value) => on_event(SubscriptionEvent::Event(value)),
                Err(e) => {
                    tracing::warn!(error = %e, channel = %decode_channel, "Dropping undecodable notification");
                    decode_failures.add(1, &[]);
                }
            },
        });

        let (shared, stop_rx) = HandleShared::new(channel, callback);
        let handle = SubscriptionHandle::new(Arc::clone(&shared));

        // On failure the handle drops here and lands in `Unsubscribed`.
        self.upstream.ensure().await?;

        let routes = &self.upstream.routes;
        let rx = routes
            .entry(shared.channel().to_string())
            .or_insert_with(|| {
                self.metrics.active_routes.add(1, &[]);
                broadcast::channel(self.config.route_capacity).0
            })
            .value()
            .subscribe();

        shared.mark_active();

        let channel = shared.channel().to_string();
        tokio::spawn(
            Self::run_delivery(shared, rx, stop_rx, Arc::clone(routes), self.metrics.clone())
                .instrument(tracing::debug_span!("subscription_delivery", channel = %channel)),
        );

        Ok(handle)
    }

    async fn run_delivery(
        shared: Arc<HandleShared>,
        mut rx: broadcast::Receiver<RouteEvent>,
        mut stop: watch::Receiver<bool>,
        routes: Routes,
        metrics: Metrics,
    ) {
        let mut next = Some(SubscriptionEvent::Activated);

        while let Some(event) = next.take() {
            metrics.callbacks_total.add(1, &[KeyValue::new("kind", event_kind(&event))]);
            if !shared.deliver(event) {
                break;
            }

            next = tokio::select! {
                biased;
                _ = stop.changed() => None,
                received = rx.recv() => match received {
                    Ok(event) => Some(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "Subscriber lagged, requesting resync");
                        Some(SubscriptionEvent::Activated)
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Route failed, subscription is no longer active");
                        shared.mark_unsubscribed();
                        None
                    }
                },
            };
        }

        drop(rx);
        if routes.remove_if(shared.channel(), |_, tx| tx.receiver_count() == 0).is_some() {
            metrics.active_routes.add(-1, &[]);
        }
    }

    async fn run_gc(routes: Routes, metrics: Metrics, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let start = Instant::now();
                    let mut reclaimed_this_cycle = 0;

                    routes.retain(|_, sender| {
                        let active = sender.receiver_count() > 0;
                        if !active {
                            metrics.active_routes.add(-1, &[]);
                            reclaimed_this_cycle += 1;
                        }
                        active
                    });

                    metrics.gc_duration_seconds.record(start.elapsed().as_secs_f64(), &[]);
                    if reclaimed_this_cycle > 0 {
                        metrics.gc_reclaimed_total.add(reclaimed_this_cycle, &[]);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

const fn event_kind(event: &RouteEvent) -> &'static str {
    match event {
        SubscriptionEvent::Activated => "activated",
        SubscriptionEvent::Event(_) => "event",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::pubsub::LocalPubSub;
    use crate::domain::event::ChangeKind;
    use crate::domain::message::MessageType;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    fn manager() -> (SubscriptionManager, Arc<LocalPubSub>, watch::Sender<bool>) {
        manager_with(&NotificationConfig::default())
    }

    fn manager_with(config: &NotificationConfig) -> (SubscriptionManager, Arc<LocalPubSub>, watch::Sender<bool>) {
        let bus = Arc::new(LocalPubSub::new(64));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = SubscriptionManager::new(Arc::clone(&bus) as Arc<dyn PubSub>, config, shutdown_rx);
        (manager, bus, shutdown_tx)
    }

    fn fast_resubscribe() -> NotificationConfig {
        NotificationConfig { resubscribe_max_times: 2, resubscribe_min_backoff_ms: 1, ..NotificationConfig::default() }
    }

    /// Refuses exactly one upstream subscribe call.
    #[derive(Debug)]
    struct RefusingPubSub {
        inner: LocalPubSub,
        calls: AtomicUsize,
        refuse_call: usize,
    }

    #[async_trait]
    impl PubSub for RefusingPubSub {
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, pattern: &str) -> anyhow::Result<broadcast::Receiver<PubSubEvent>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.refuse_call {
                anyhow::bail!("subscribe refused");
            }
            self.inner.subscribe(pattern).await
        }

        async fn ping(&self) -> anyhow::Result<()> {
            self.inner.ping().await
        }
    }

    async fn wait_for_state(handle: &SubscriptionHandle, state: SubscriptionState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state reached");
    }

    fn message(conversation_id: Uuid, id: i64) -> Message {
        Message {
            id,
            conversation_id,
            sender_id: Uuid::new_v4(),
            sender_is_admin: false,
            content: format!("message {id}"),
            message_type: MessageType::Text,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.expect("timed out").expect("closed")
    }

    #[tokio::test]
    async fn test_activated_then_messages() {
        let (manager, _bus, _shutdown) = manager();
        let conversation_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = manager
            .subscribe_messages(conversation_id, move |event| {
                let _ = tx.send(event);
            })
            .await
            .expect("subscribe");
        assert_eq!(handle.state(), SubscriptionState::Active);
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);

        let sent = message(conversation_id, 7);
        manager.publish_message(&sent).await.expect("publish");
        manager.publish_message(&message(Uuid::new_v4(), 8)).await.expect("publish");

        assert_eq!(next(&mut rx).await, SubscriptionEvent::Event(sent));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_callback_after_unsubscribe() {
        let (manager, _bus, _shutdown) = manager();
        let conversation_id = Uuid::new_v4();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = manager
            .subscribe_messages(conversation_id, move |event| {
                sink.lock().expect("lock").push(event);
            })
            .await
            .expect("subscribe");

        handle.unsubscribe();
        handle.unsubscribe();
        assert_eq!(handle.state(), SubscriptionState::Unsubscribed);
        let delivered = seen.lock().expect("lock").len();

        manager.publish_message(&message(conversation_id, 1)).await.expect("publish");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().expect("lock").len(), delivered);
    }

    #[tokio::test]
    async fn test_route_reclaimed_after_last_unsubscribe() {
        let (manager, _bus, _shutdown) = manager();
        let handle = manager.subscribe_conversations(|_| {}).await.expect("subscribe");
        assert_eq!(manager.route_count(), 1);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.route_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("route reclaimed");
    }

    #[tokio::test]
    async fn test_establishment_failure_reported_once() {
        let (manager, bus, _shutdown) = manager();
        bus.set_available(false);

        let result = manager.subscribe_conversations(|_| {}).await;
        assert!(matches!(result, Err(AppError::Subscription(_))));

        bus.set_available(true);
        let handle = manager.subscribe_conversations(|_| {}).await.expect("subscribe");
        assert_eq!(handle.state(), SubscriptionState::Active);
    }

    #[tokio::test]
    async fn test_reconnect_reactivates_handles() {
        let (manager, bus, _shutdown) = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager
            .subscribe_conversations(move |event| {
                let _ = tx.send(event);
            })
            .await
            .expect("subscribe");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);

        bus.announce_reconnect();
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);

        let change = ConversationChange::new(Uuid::new_v4(), ChangeKind::Created);
        manager.publish_change(change).await.expect("publish");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Event(change));
    }

    #[tokio::test]
    async fn test_partial_establishment_does_not_duplicate_delivery() {
        // The message pattern subscribes, the directory pattern is refused.
        let bus = RefusingPubSub { inner: LocalPubSub::new(64), calls: AtomicUsize::new(0), refuse_call: 2 };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = SubscriptionManager::new(Arc::new(bus), &NotificationConfig::default(), shutdown_rx);
        let conversation_id = Uuid::new_v4();

        let result = manager.subscribe_messages(conversation_id, |_| {}).await;
        assert!(matches!(result, Err(AppError::Subscription(_))));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager
            .subscribe_messages(conversation_id, move |event| {
                let _ = tx.send(event);
            })
            .await
            .expect("subscribe");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);

        let sent = message(conversation_id, 1);
        manager.publish_message(&sent).await.expect("publish");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Event(sent));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_upstream_is_reestablished() {
        let (manager, bus, _shutdown) = manager_with(&fast_resubscribe());
        let conversation_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = manager
            .subscribe_messages(conversation_id, move |event| {
                let _ = tx.send(event);
            })
            .await
            .expect("subscribe");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);

        bus.disconnect();
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);
        assert_eq!(handle.state(), SubscriptionState::Active);

        let sent = message(conversation_id, 3);
        manager.publish_message(&sent).await.expect("publish");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Event(sent));

        let (late_tx, mut late_rx) = mpsc::unbounded_channel();
        let _late = manager
            .subscribe_messages(conversation_id, move |event| {
                let _ = late_tx.send(event);
            })
            .await
            .expect("subscribe");
        assert_eq!(next(&mut late_rx).await, SubscriptionEvent::Activated);

        let again = message(conversation_id, 4);
        manager.publish_message(&again).await.expect("publish");
        assert_eq!(next(&mut late_rx).await, SubscriptionEvent::Event(again.clone()));
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Event(again));
    }

    #[tokio::test]
    async fn test_unrecoverable_upstream_fails_live_handles() {
        let (manager, bus, _shutdown) = manager_with(&fast_resubscribe());
        let handle = manager.subscribe_conversations(|_| {}).await.expect("subscribe");

        bus.set_available(false);
        bus.disconnect();
        wait_for_state(&handle, SubscriptionState::Unsubscribed).await;
        assert_eq!(manager.route_count(), 0);

        let result = manager.subscribe_conversations(|_| {}).await;
        assert!(matches!(result, Err(AppError::Subscription(_))));

        bus.set_available(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = manager
            .subscribe_conversations(move |event| {
                let _ = tx.send(event);
            })
            .await
            .expect("subscribe");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Activated);

        let change = ConversationChange::new(Uuid::new_v4(), ChangeKind::Created);
        manager.publish_change(change).await.expect("publish");
        assert_eq!(next(&mut rx).await, SubscriptionEvent::Event(change));
    }
}
