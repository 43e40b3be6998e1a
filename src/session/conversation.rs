use crate::domain::event::SubscriptionEvent;
use crate::domain::message::{Message, TEXT_MESSAGE_TYPE};
use crate::domain::read_state::ReadMarker;
use crate::domain::timeline::MessageTimeline;
use crate::domain::viewer::Viewer;
use crate::error::Result;
use crate::services::ServiceContainer;
use crate::services::subscription::SubscriptionHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

// State shared between the view and its worker task.
#[derive(Debug)]
struct ViewCore {
    conversation_id: Uuid,
    viewer: Viewer,
    services: ServiceContainer,
    timeline: watch::Sender<MessageTimeline>,
    alive: AtomicBool,
    // Serialises fetch, send and mark-read on this conversation.
    op_lock: tokio::sync::Mutex<()>,
}

impl ViewCore {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn merge(&self, messages: impl IntoIterator<Item = Message>) -> usize {
        if !self.is_alive() {
            return 0;
        }
        let mut added = 0;
        self.timeline.send_if_modified(|timeline| {
            added = timeline.merge(messages);
            added > 0
        });
        added
    }

    /// Fetches the full history, merges it, then marks everything read.
    async fn resync(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let history = self.services.message_service.list_all(self.conversation_id, &self.viewer).await?;
        self.merge(history);
        self.mark_read_locked().await?;
        Ok(())
    }

    async fn mark_read_locked(&self) -> Result<Option<ReadMarker>> {
        if !self.is_alive() {
            return Ok(None);
        }
        self.services.read_state_service.mark_read(self.conversation_id, &self.viewer).await
    }

    async fn on_pushed(&self, message: Message) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let from_other_party = message.sender_id != self.viewer.id;
        if self.merge([message]) > 0 && from_other_party {
            self.mark_read_locked().await?;
        }
        Ok(())
    }
}

/// An open conversation: its merged message list plus read tracking.
///
/// History fetches and pushed messages are merged by id into one ordered timeline, so arrival
/// order and duplicates do not matter.
#[derive(Debug)]
pub struct ConversationView {
    core: Arc<ViewCore>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ConversationView {
    /// Subscribes to the conversation, loads its history and marks it read.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` or `AppError::Forbidden` if the conversation cannot be viewed,
    /// and `AppError::Subscription` if the message channel cannot be established.
    #[tracing::instrument(err(level = "warn"), skip(services, viewer), fields(viewer_id = %viewer.id))]
    pub(crate) async fn open(services: ServiceContainer, viewer: Viewer, conversation_id: Uuid) -> Result<Self> {
        services.conversation_service.get(conversation_id, &viewer).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = services
            .subscription_manager
            .subscribe_messages(conversation_id, move |event| {
                let _ = events_tx.send(event);
            })
            .await?;

        let core = Arc::new(ViewCore {
            conversation_id,
            viewer,
            services,
            timeline: watch::channel(MessageTimeline::new()).0,
            alive: AtomicBool::new(true),
            op_lock: tokio::sync::Mutex::new(()),
        });

        // Subscribed first, so nothing inserted after this fetch can be missed.
        core.resync().await?;

        tokio::spawn(
            Self::run_worker(events_rx, Arc::clone(&core))
                .instrument(tracing::debug_span!("conversation_view", conversation_id = %conversation_id)),
        );

        Ok(Self { core, subscription: Mutex::new(Some(subscription)) })
    }

    async fn run_worker(mut events: mpsc::UnboundedReceiver<SubscriptionEvent<Message>>, core: Arc<ViewCore>) {
        // The activation queued at subscribe time is already covered by the fetch in `open`.
        let mut primed = true;
        while let Some(event) = events.recv().await {
            if !core.is_alive() {
                break;
            }
            let initial = std::mem::replace(&mut primed, false);
            let result = match event {
                SubscriptionEvent::Activated if initial => Ok(()),
                SubscriptionEvent::Activated => core.resync().await,
                SubscriptionEvent::Event(message) => core.on_pushed(message).await,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to apply conversation update");
            }
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> Uuid {
        self.core.conversation_id
    }

    /// Messages in `(created_at, id)` order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.core.timeline.borrow().to_vec()
    }

    /// Sends `draft` as a text message. The draft is cleared only if the send succeeds.
    ///
    /// # Errors
    /// Returns whatever `MessageService::send` returns; the draft is left untouched.
    pub async fn send(&self, draft: &mut String) -> Result<Message> {
        let _guard = self.core.op_lock.lock().await;
        let message = self
            .core
            .services
            .message_service
            .send(self.core.conversation_id, &self.core.viewer, draft, TEXT_MESSAGE_TYPE)
            .await?;

        self.core.merge([message.clone()]);
        draft.clear();
        Ok(message)
    }

    /// # Errors
    /// Returns the store error if the marker cannot be advanced.
    pub async fn mark_read(&self) -> Result<Option<ReadMarker>> {
        let _guard = self.core.op_lock.lock().await;
        self.core.mark_read_locked().await
    }

    /// Waits until `predicate` holds for the timeline. Returns `false` on timeout.
    pub async fn wait_until<P>(&self, mut predicate: P, timeout: Duration) -> bool
    where
        P: FnMut(&MessageTimeline) -> bool,
    {
        let mut rx = self.core.timeline.subscribe();
        matches!(tokio::time::timeout(timeout, rx.wait_for(|t| predicate(t))).await, Ok(Ok(_)))
    }

    /// Stops live updates. Store calls already in flight finish, but their results are discarded.
    pub fn close(&self) {
        self.core.alive.store(false, Ordering::Release);
        let subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = subscription {
            handle.unsubscribe();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.core.is_alive()
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppBuilder;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::pubsub::LocalPubSub;
    use crate::adapters::store::ChatStore;
    use crate::config::Config;
    use crate::domain::conversation::{AssignOutcome, Conversation, ConversationStatus, ConversationSummary};
    use crate::domain::message::{MessageKey, NewMessage};
    use crate::domain::read_state::UnreadSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Memory store that counts message-list reads.
    #[derive(Debug, Default)]
    struct CountingStore {
        inner: MemoryStore,
        message_reads: AtomicUsize,
    }

    #[async_trait]
    impl ChatStore for CountingStore {
        async fn create_conversation(&self, client_id: Uuid, subject: Option<String>) -> Result<Conversation> {
            self.inner.create_conversation(client_id, subject).await
        }

        async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
            self.inner.find_conversation(conversation_id).await
        }

        async fn list_for_viewer(&self, viewer: &Viewer) -> Result<Vec<ConversationSummary>> {
            self.inner.list_for_viewer(viewer).await
        }

        async fn append_message(&self, message: NewMessage) -> Result<Message> {
            self.inner.append_message(message).await
        }

        async fn list_messages(&self, conversation_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Message>> {
            self.message_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.list_messages(conversation_id, limit, offset).await
        }

        async fn latest_message_key(&self, conversation_id: Uuid) -> Result<Option<MessageKey>> {
            self.inner.latest_message_key(conversation_id).await
        }

        async fn assign_if_unassigned(&self, conversation_id: Uuid, admin_id: Uuid) -> Result<AssignOutcome> {
            self.inner.assign_if_unassigned(conversation_id, admin_id).await
        }

        async fn transition_status(
            &self,
            conversation_id: Uuid,
            from: ConversationStatus,
            to: ConversationStatus,
        ) -> Result<Option<Conversation>> {
            self.inner.transition_status(conversation_id, from, to).await
        }

        async fn advance_read_marker(&self, marker: ReadMarker) -> Result<ReadMarker> {
            self.inner.advance_read_marker(marker).await
        }

        async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u64> {
            self.inner.unread_count(conversation_id, viewer_id).await
        }

        async fn unread_snapshot(&self, viewer: &Viewer) -> Result<UnreadSnapshot> {
            self.inner.unread_snapshot(viewer).await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_open_fetches_history_once() {
        let store = Arc::new(CountingStore::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = AppBuilder::new(Config::default())
            .with_store(Arc::clone(&store) as Arc<dyn ChatStore>)
            .with_pubsub(Arc::new(LocalPubSub::new(64)))
            .with_shutdown_rx(shutdown_rx)
            .build()
            .expect("app");

        let client = Viewer::client(Uuid::new_v4());
        let conversation =
            app.services.conversation_service.create(&client, client.id, None).await.expect("create");
        app.services
            .message_service
            .send(conversation.id, &client, "hello", TEXT_MESSAGE_TYPE)
            .await
            .expect("send");

        let view = ConversationView::open(app.services.clone(), client, conversation.id).await.expect("open");
        assert_eq!(view.messages().len(), 1);

        // Long enough for the worker to drain the activation queued at subscribe time.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.message_reads.load(Ordering::SeqCst), 1);

        view.close();
    }
}
