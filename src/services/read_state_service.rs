use crate::adapters::store::ChatStore;
use crate::domain::event::{ChangeKind, ConversationChange};
use crate::domain::read_state::{ReadMarker, UnreadSnapshot};
use crate::domain::viewer::Viewer;
use crate::error::Result;
use crate::services::conversation_service::ConversationService;
use crate::services::subscription::SubscriptionManager;
use std::sync::Arc;
use uuid::Uuid;

/// Per-viewer read markers and the unread counts derived from them.
#[derive(Clone, Debug)]
pub struct ReadStateService {
    store: Arc<dyn ChatStore>,
    conversations: ConversationService,
    notifier: Arc<SubscriptionManager>,
}

impl ReadStateService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, conversations: ConversationService, notifier: Arc<SubscriptionManager>) -> Self {
        Self { store, conversations, notifier }
    }

    /// Marks everything currently in the conversation as read by `viewer`.
    ///
    /// The marker only ever moves forward. Returns `None` when the conversation has no messages yet.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Forbidden` if `viewer` may not see it.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn mark_read(&self, conversation_id: Uuid, viewer: &Viewer) -> Result<Option<ReadMarker>> {
        self.conversations.get(conversation_id, viewer).await?;

        let Some(latest) = self.store.latest_message_key(conversation_id).await? else {
            return Ok(None);
        };

        let marker = self.store.advance_read_marker(ReadMarker::at(conversation_id, viewer.id, latest)).await?;
        tracing::debug!(last_read_message_id = marker.last_read_message_id, "Read marker advanced");

        self.notifier
            .notify_change(ConversationChange::new(conversation_id, ChangeKind::ReadStateChanged { viewer_id: viewer.id }))
            .await;
        Ok(Some(marker))
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Forbidden` if `viewer` may not see it.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn unread_count(&self, conversation_id: Uuid, viewer: &Viewer) -> Result<u64> {
        self.conversations.get(conversation_id, viewer).await?;
        self.store.unread_count(conversation_id, viewer.id).await
    }

    /// Unread counts for every conversation `viewer` can see, read in one store call.
    ///
    /// # Errors
    /// Returns `AppError::Database` or `AppError::TransientNetwork` if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn snapshot(&self, viewer: &Viewer) -> Result<UnreadSnapshot> {
        self.store.unread_snapshot(viewer).await
    }

    /// # Errors
    /// Same as [`Self::snapshot`].
    pub async fn unread_total(&self, viewer: &Viewer) -> Result<u64> {
        Ok(self.snapshot(viewer).await?.total())
    }
}
