use crate::domain::conversation::{Conversation, ConversationSummary, sort_for_listing};
use crate::domain::event::{ConversationChange, SubscriptionEvent};
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

/// A viewer's live list of conversations.
///
/// Kept current by re-fetching on every relevant change signal; local mutations may also patch it
/// directly so the caller sees its own result without waiting for the round trip.
#[derive(Debug)]
pub struct DirectoryView {
    viewer: Viewer,
    services: ServiceContainer,
    summaries: Arc<watch::Sender<Vec<ConversationSummary>>>,
    alive: Arc<AtomicBool>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl DirectoryView {
    /// Subscribes to directory changes and loads the first snapshot.
    ///
    /// # Errors
    /// Returns `AppError::Subscription` if the change channel cannot be established, or the
    /// store error if the first fetch fails.
    pub(crate) async fn open(services: ServiceContainer, viewer: Viewer) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = services
            .subscription_manager
            .subscribe_conversations(move |event| {
                let _ = events_tx.send(event);
            })
            .await?;

        let view = Self {
            viewer,
            services,
            summaries: Arc::new(watch::channel(Vec::new()).0),
            alive: Arc::new(AtomicBool::new(true)),
            subscription: Mutex::new(Some(subscription)),
        };
        view.refresh().await?;

        tokio::spawn(
            Self::run_worker(
                events_rx,
                view.viewer,
                view.services.clone(),
                Arc::clone(&view.summaries),
                Arc::clone(&view.alive),
            )
            .instrument(tracing::debug_span!("directory_view", viewer_id = %viewer.id)),
        );

        Ok(view)
    }

    async fn run_worker(
        mut events: mpsc::UnboundedReceiver<SubscriptionEvent<ConversationChange>>,
        viewer: Viewer,
        services: ServiceContainer,
        summaries: Arc<watch::Sender<Vec<ConversationSummary>>>,
        alive: Arc<AtomicBool>,
    ) {
        while let Some(event) = events.recv().await {
            let mut stale = Self::is_relevant(&event, viewer);
            // Coalesce a burst of signals into a single fetch.
            while let Ok(next) = events.try_recv() {
                stale |= Self::is_relevant(&next, viewer);
            }
            if !stale {
                continue;
            }

            match services.conversation_service.list_for_viewer(&viewer).await {
                Ok(fresh) if alive.load(Ordering::Acquire) => {
                    summaries.send_replace(fresh);
                }
                Ok(_) => break,
                Err(e) => tracing::warn!(error = %e, "Failed to refresh conversation directory"),
            }
        }
    }

    fn is_relevant(event: &SubscriptionEvent<ConversationChange>, viewer: Viewer) -> bool {
        match event {
            SubscriptionEvent::Activated => true,
            SubscriptionEvent::Event(change) => change.concerns(viewer.id),
        }
    }

    /// Re-fetches the directory from the store.
    ///
    /// # Errors
    /// Returns the store error if the fetch fails.
    pub async fn refresh(&self) -> Result<()> {
        let fresh = self.services.conversation_service.list_for_viewer(&self.viewer).await?;
        if self.alive.load(Ordering::Acquire) {
            self.summaries.send_replace(fresh);
        }
        Ok(())
    }

    /// Replaces the local copy of one conversation, keeping its unread count.
    pub(crate) fn patch(&self, conversation: Conversation) {
        if !self.alive.load(Ordering::Acquire) || !self.viewer.can_access(&conversation) {
            return;
        }
        self.summaries.send_modify(|summaries| {
            match summaries.iter_mut().find(|s| s.conversation.id == conversation.id) {
                Some(existing) => existing.conversation = conversation,
                None => summaries.push(ConversationSummary { conversation, unread_count: 0 }),
            }
            sort_for_listing(summaries);
        });
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.summaries.borrow().clone()
    }

    #[must_use]
    pub fn get(&self, conversation_id: Uuid) -> Option<ConversationSummary> {
        self.summaries.borrow().iter().find(|s| s.conversation.id == conversation_id).cloned()
    }

    /// Sum of the unread counts shown in the directory.
    #[must_use]
    pub fn unread_total(&self) -> u64 {
        self.summaries.borrow().iter().map(|s| s.unread_count).sum()
    }

    /// Waits until `predicate` holds for the directory. Returns `false` on timeout.
    pub async fn wait_until<P>(&self, mut predicate: P, timeout: Duration) -> bool
    where
        P: FnMut(&[ConversationSummary]) -> bool,
    {
        let mut rx = self.summaries.subscribe();
        matches!(tokio::time::timeout(timeout, rx.wait_for(|s| predicate(s))).await, Ok(Ok(_)))
    }

    /// Stops live updates. Results of fetches still in flight are discarded.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        let subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = subscription {
            handle.unsubscribe();
        }
    }
}

impl Drop for DirectoryView {
    fn drop(&mut self) {
        self.close();
    }
}
