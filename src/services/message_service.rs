use crate::adapters::store::ChatStore;
use crate::config::MessagingConfig;
use crate::domain::event::{ChangeKind, ConversationChange};
use crate::domain::message::{Message, MessageType, NewMessage};
use crate::domain::viewer::Viewer;
use crate::error::{AppError, Result};
use crate::services::conversation_service::ConversationService;
use crate::services::subscription::SubscriptionManager;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    fetch_page_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            sent_total: meter
                .u64_counter("parley_messages_sent_total")
                .with_description("Total message send attempts")
                .build(),
            fetch_page_size: meter
                .u64_histogram("parley_message_fetch_page_size")
                .with_description("Number of messages returned by a single page fetch")
                .build(),
        }
    }
}

/// Ordered read/append access to a conversation's messages.
#[derive(Clone, Debug)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    conversations: ConversationService,
    notifier: Arc<SubscriptionManager>,
    config: MessagingConfig,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChatStore>,
        conversations: ConversationService,
        notifier: Arc<SubscriptionManager>,
        config: MessagingConfig,
    ) -> Self {
        Self { store, conversations, notifier, config, metrics: Metrics::new() }
    }

    /// Appends a message to a conversation.
    ///
    /// Once this returns, the message is visible to every later `list` regardless of push delivery.
    ///
    /// # Errors
    /// Returns `AppError::InvalidArgument` if the content is blank or too long, or the type is unsupported.
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Forbidden` if the sender is neither the owning client nor an admin.
    /// Returns `AppError::Conflict` if the conversation is closed or archived.
    #[tracing::instrument(err(level = "warn"), skip(self, sender, content), fields(sender_id = %sender.id))]
    pub async fn send(
        &self,
        conversation_id: Uuid,
        sender: &Viewer,
        content: &str,
        message_type: &str,
    ) -> Result<Message> {
        let draft = NewMessage::new(
            conversation_id,
            sender.id,
            sender.is_admin,
            content,
            MessageType::default(),
            self.config.max_content_chars,
        )?;
        let message_type: MessageType = message_type.parse().map_err(AppError::InvalidArgument)?;
        let draft = NewMessage { message_type, ..draft };

        let conversation = self.conversations.get(conversation_id, sender).await?;
        if !conversation.status.accepts_messages() {
            return Err(AppError::Conflict(format!("Conversation is {}", conversation.status)));
        }

        match self.store.append_message(draft).await {
            Ok(message) => {
                tracing::debug!(message_id = message.id, "Message stored");
                self.metrics.sent_total.add(1, &[KeyValue::new("status", "success")]);

                self.notifier.notify_message(&message).await;
                self.notifier
                    .notify_change(ConversationChange::new(conversation_id, ChangeKind::MessageAppended))
                    .await;
                Ok(message)
            }
            Err(e) => {
                self.metrics.sent_total.add(1, &[KeyValue::new("status", "failure")]);
                Err(e)
            }
        }
    }

    /// Fetches one page of messages ordered by `(created_at, id)`.
    ///
    /// `limit` defaults to the configured page size and is clamped to `[1, max_page_size]`.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Forbidden` if `viewer` may not see it.
    #[tracing::instrument(err(level = "warn"), skip(self, viewer), fields(viewer_id = %viewer.id))]
    pub async fn list(
        &self,
        conversation_id: Uuid,
        viewer: &Viewer,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.conversations.get(conversation_id, viewer).await?;

        let limit = limit.unwrap_or(self.config.default_page_size).clamp(1, self.config.max_page_size.max(1));
        let offset = offset.unwrap_or(0).max(0);
        let messages = self.store.list_messages(conversation_id, limit, offset).await?;

        self.metrics.fetch_page_size.record(messages.len() as u64, &[]);
        Ok(messages)
    }

    /// Fetches every message of a conversation by walking pages of the maximum size.
    ///
    /// # Errors
    /// Same as [`Self::list`].
    pub async fn list_all(&self, conversation_id: Uuid, viewer: &Viewer) -> Result<Vec<Message>> {
        let page_size = self.config.max_page_size.max(1);
        let mut all = Vec::new();
        loop {
            let offset = i64::try_from(all.len()).unwrap_or(i64::MAX);
            let page = self.list(conversation_id, viewer, Some(page_size), Some(offset)).await?;
            let done = i64::try_from(page.len()).unwrap_or(0) < page_size;
            all.extend(page);
            if done {
                return Ok(all);
            }
        }
    }
}
