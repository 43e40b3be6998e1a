use crate::domain::conversation::{AssignOutcome, Conversation, ConversationStatus, ConversationSummary};
use crate::domain::message::{Message, MessageKey, NewMessage};
use crate::domain::read_state::{ReadMarker, UnreadSnapshot};
use crate::domain::viewer::Viewer;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// The durable data service behind the messaging core.
///
/// Implementations own visibility filtering and every conditional update; callers never
/// read a value and write it back in a separate call.
#[async_trait]
pub trait ChatStore: Send + Sync + std::fmt::Debug {
    async fn create_conversation(&self, client_id: Uuid, subject: Option<String>) -> Result<Conversation>;

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations visible to `viewer`, newest activity first, with the viewer's unread counts.
    async fn list_for_viewer(&self, viewer: &Viewer) -> Result<Vec<ConversationSummary>>;

    /// Appends a message and bumps the conversation's activity timestamps in one atomic step.
    ///
    /// Fails with `NotFound` if the conversation is gone and `Conflict` if it no longer accepts
    /// messages.
    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    /// Messages ordered by `(created_at, id)` ascending.
    async fn list_messages(&self, conversation_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Message>>;

    async fn latest_message_key(&self, conversation_id: Uuid) -> Result<Option<MessageKey>>;

    /// Sets `admin_id` only if it is currently unset.
    async fn assign_if_unassigned(&self, conversation_id: Uuid, admin_id: Uuid) -> Result<AssignOutcome>;

    /// Moves the status from `from` to `to` only if it currently equals `from`.
    /// Returns `None` if the conversation exists but holds a different status.
    async fn transition_status(
        &self,
        conversation_id: Uuid,
        from: ConversationStatus,
        to: ConversationStatus,
    ) -> Result<Option<Conversation>>;

    /// Moves the marker forward to `marker` if that is later than the stored one and returns
    /// whichever marker is now stored.
    async fn advance_read_marker(&self, marker: ReadMarker) -> Result<ReadMarker>;

    async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u64>;

    /// Unread counts for every conversation visible to `viewer`, in one read.
    async fn unread_snapshot(&self, viewer: &Viewer) -> Result<UnreadSnapshot>;

    async fn ping(&self) -> Result<()>;
}
