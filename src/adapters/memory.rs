use crate::adapters::store::ChatStore;
use crate::domain::conversation::{
    AssignOutcome, Conversation, ConversationStatus, ConversationSummary, sort_for_listing,
};
use crate::domain::message::{Message, MessageKey, NewMessage};
use crate::domain::read_state::{ReadMarker, UnreadSnapshot, is_unread};
use crate::domain::viewer::Viewer;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    conversations: HashMap<Uuid, Conversation>,
    // Kept sorted by key; appends only ever go to the end because timestamps are clamped.
    messages: HashMap<Uuid, Vec<Message>>,
    markers: HashMap<(Uuid, Uuid), ReadMarker>,
    next_message_id: i64,
    last_timestamp: Option<OffsetDateTime>,
}

impl State {
    // Store-assigned timestamps never run backwards, like a database clock.
    fn now(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let now = self.last_timestamp.map_or(now, |last| now.max(last));
        self.last_timestamp = Some(now);
        now
    }

    fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> u64 {
        let marker = self.markers.get(&(conversation_id, viewer_id)).map(ReadMarker::key);
        self.messages
            .get(&conversation_id)
            .map_or(0, |msgs| msgs.iter().filter(|m| is_unread(m, viewer_id, marker)).count() as u64)
    }

    fn visible<'a>(&'a self, viewer: &'a Viewer) -> impl Iterator<Item = &'a Conversation> + 'a {
        self.conversations.values().filter(move |c| viewer.can_access(c))
    }
}

/// Process-local [`ChatStore`] with the same semantics as the Postgres store.
///
/// Every operation runs inside one critical section, which makes each conditional update atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_conversation(&self, client_id: Uuid, subject: Option<String>) -> Result<Conversation> {
        let mut state = self.lock();
        let now = state.now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            client_id,
            admin_id: None,
            subject,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
            last_message_at: None,
        };
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.lock().conversations.get(&conversation_id).cloned())
    }

    async fn list_for_viewer(&self, viewer: &Viewer) -> Result<Vec<ConversationSummary>> {
        let state = self.lock();
        let mut summaries: Vec<_> = state
            .visible(viewer)
            .map(|c| ConversationSummary { conversation: c.clone(), unread_count: state.unread_count(c.id, viewer.id) })
            .collect();
        sort_for_listing(&mut summaries);
        Ok(summaries)
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let mut state = self.lock();
        let status = state.conversations.get(&message.conversation_id).map(|c| c.status).ok_or(AppError::NotFound)?;
        if !status.accepts_messages() {
            return Err(AppError::Conflict(format!("Conversation is {status}")));
        }

        let created_at = state.now();
        state.next_message_id += 1;
        let stored = Message {
            id: state.next_message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_is_admin: message.sender_is_admin,
            content: message.content,
            message_type: message.message_type,
            created_at,
        };

        state.messages.entry(stored.conversation_id).or_default().push(stored.clone());
        if let Some(conversation) = state.conversations.get_mut(&stored.conversation_id) {
            conversation.last_message_at = Some(created_at);
            conversation.updated_at = conversation.updated_at.max(created_at);
        }
        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Message>> {
        let state = self.lock();
        let skip = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let take = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .messages
            .get(&conversation_id)
            .map(|msgs| msgs.iter().skip(skip).take(take).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_message_key(&self, conversation_id: Uuid) -> Result<Option<MessageKey>> {
        Ok(self.lock().messages.get(&conversation_id).and_then(|msgs| msgs.last()).map(Message::key))
    }

    async fn assign_if_unassigned(&self, conversation_id: Uuid, admin_id: Uuid) -> Result<AssignOutcome> {
        let mut state = self.lock();
        let now = state.now();
        let conversation = state.conversations.get_mut(&conversation_id).ok_or(AppError::NotFound)?;

        if let Some(winner) = conversation.admin_id {
            return Ok(AssignOutcome::AlreadyAssigned { admin_id: winner });
        }
        conversation.admin_id = Some(admin_id);
        conversation.updated_at = now;
        Ok(AssignOutcome::Assigned(conversation.clone()))
    }

    async fn transition_status(
        &self,
        conversation_id: Uuid,
        from: ConversationStatus,
        to: ConversationStatus,
    ) -> Result<Option<Conversation>> {
        let mut state = self.lock();
        let now = state.now();
        let conversation = state.conversations.get_mut(&conversation_id).ok_or(AppError::NotFound)?;

        if conversation.status != from {
            return Ok(None);
        }
        conversation.status = to;
        conversation.updated_at = now;
        Ok(Some(conversation.clone()))
    }

    async fn advance_read_marker(&self, marker: ReadMarker) -> Result<ReadMarker> {
        let mut state = self.lock();
        if !state.conversations.contains_key(&marker.conversation_id) {
            return Err(AppError::NotFound);
        }

        let stored = state
            .markers
            .entry((marker.conversation_id, marker.viewer_id))
            .and_modify(|current| {
                if marker.key() > current.key() {
                    *current = marker;
                }
            })
            .or_insert(marker);
        Ok(*stored)
    }

    async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u64> {
        Ok(self.lock().unread_count(conversation_id, viewer_id))
    }

    async fn unread_snapshot(&self, viewer: &Viewer) -> Result<UnreadSnapshot> {
        let state = self.lock();
        Ok(state.visible(viewer).map(|c| (c.id, state.unread_count(c.id, viewer.id))).collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageType;

    fn text(conversation_id: Uuid, sender: Uuid, content: &str) -> NewMessage {
        NewMessage::new(conversation_id, sender, false, content, MessageType::Text, 100).expect("valid")
    }

    #[tokio::test]
    async fn test_append_bumps_activity() {
        let store = MemoryStore::new();
        let client = Uuid::new_v4();
        let conversation = store.create_conversation(client, None).await.expect("create");

        let message = store.append_message(text(conversation.id, client, "hello")).await.expect("append");

        let stored = store.find_conversation(conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.last_message_at, Some(message.created_at));
        assert!(stored.updated_at >= conversation.updated_at);
    }

    #[tokio::test]
    async fn test_append_rejects_closed_conversation() {
        let store = MemoryStore::new();
        let client = Uuid::new_v4();
        let conversation = store.create_conversation(client, None).await.expect("create");
        store
            .transition_status(conversation.id, ConversationStatus::Active, ConversationStatus::Closed)
            .await
            .expect("close");

        let result = store.append_message(text(conversation.id, client, "late")).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_marker_never_moves_backwards() {
        let store = MemoryStore::new();
        let client = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let conversation = store.create_conversation(client, None).await.expect("create");
        let first = store.append_message(text(conversation.id, admin, "one")).await.expect("append");
        let second = store.append_message(text(conversation.id, admin, "two")).await.expect("append");

        store.advance_read_marker(ReadMarker::at(conversation.id, client, second.key())).await.expect("advance");
        let kept = store.advance_read_marker(ReadMarker::at(conversation.id, client, first.key())).await.expect("advance");

        assert_eq!(kept.key(), second.key());
        assert_eq!(store.unread_count(conversation.id, client).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_visibility_is_enforced_by_store() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.create_conversation(alice, Some("a".into())).await.expect("create");
        store.create_conversation(bob, Some("b".into())).await.expect("create");

        assert_eq!(store.list_for_viewer(&Viewer::client(alice)).await.expect("list").len(), 1);
        assert_eq!(store.list_for_viewer(&Viewer::admin(Uuid::new_v4())).await.expect("list").len(), 2);
    }
}
