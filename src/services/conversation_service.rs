use crate::adapters::store::ChatStore;
use crate::domain::conversation::{Conversation, ConversationStatus, ConversationSummary, normalize_subject};
use crate::domain::event::{ChangeKind, ConversationChange};
use crate::domain::viewer::Viewer;
use crate::error::{AppError, Result};
use crate::services::subscription::SubscriptionManager;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    created_total: Counter<u64>,
    transitions_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            created_total: meter
                .u64_counter("parley_conversations_created_total")
                .with_description("Total conversations created")
                .build(),
            transitions_total: meter
                .u64_counter("parley_status_transitions_total")
                .with_description("Conversation status transition attempts")
                .build(),
        }
    }
}

/// The conversation directory: creation, visibility and lifecycle.
#[derive(Clone, Debug)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    notifier: Arc<SubscriptionManager>,
    metrics: Metrics,
}

impl ConversationService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, notifier: Arc<SubscriptionManager>) -> Self {
        Self { store, notifier, metrics: Metrics::new() }
    }

    /// Opens a new conversation owned by `client_id`.
    ///
    /// Clients may only open conversations for themselves; admins may open one on behalf of any client.
    ///
    /// # Errors
    /// Returns `AppError::InvalidArgument` if `client_id` is nil.
    /// Returns `AppError::Forbidden` if a client names someone else.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer, subject), fields(viewer_id = %viewer.id))]
    pub async fn create(&self, viewer: &Viewer, client_id: Uuid, subject: Option<String>) -> Result<Conversation> {
        if client_id.is_nil() {
            return Err(AppError::InvalidArgument("Client id must not be empty".into()));
        }
        if !viewer.is_admin && viewer.id != client_id {
            return Err(AppError::Forbidden);
        }

        let conversation = self.store.create_conversation(client_id, normalize_subject(subject)).await?;
        tracing::info!(conversation_id = %conversation.id, "Conversation created");
        self.metrics.created_total.add(1, &[]);

        self.notifier.notify_change(ConversationChange::new(conversation.id, ChangeKind::Created)).await;
        Ok(conversation)
    }

    /// # Errors
    /// Returns `AppError::Database` or `AppError::TransientNetwork` if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn list_for_viewer(&self, viewer: &Viewer) -> Result<Vec<ConversationSummary>> {
        self.store.list_for_viewer(viewer).await
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Forbidden` if `viewer` may not see it.
    #[tracing::instrument(err(level = "debug"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn get(&self, conversation_id: Uuid, viewer: &Viewer) -> Result<Conversation> {
        let conversation = self.store.find_conversation(conversation_id).await?.ok_or(AppError::NotFound)?;
        viewer.ensure_access(&conversation)?;
        Ok(conversation)
    }

    /// Moves a conversation one step along `active -> closed -> archived`.
    ///
    /// # Errors
    /// Returns `AppError::Forbidden` for non-admins.
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Conflict` if the conversation is not in the status that precedes `target`.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn transition_status(
        &self,
        conversation_id: Uuid,
        viewer: &Viewer,
        target: ConversationStatus,
    ) -> Result<Conversation> {
        viewer.ensure_admin()?;
        let current = self.get(conversation_id, viewer).await?;

        if !current.status.can_transition_to(target) {
            self.metrics.transitions_total.add(1, &[KeyValue::new("status", "rejected")]);
            return Err(AppError::Conflict(format!("Cannot move a {} conversation to {target}", current.status)));
        }

        let Some(updated) = self.store.transition_status(conversation_id, current.status, target).await? else {
            self.metrics.transitions_total.add(1, &[KeyValue::new("status", "raced")]);
            return Err(AppError::Conflict("Conversation status changed concurrently".into()));
        };

        tracing::info!(status = %updated.status, "Conversation status changed");
        self.metrics.transitions_total.add(1, &[KeyValue::new("status", "success")]);
        self.notifier.notify_change(ConversationChange::new(conversation_id, ChangeKind::StatusChanged)).await;
        Ok(updated)
    }
}
