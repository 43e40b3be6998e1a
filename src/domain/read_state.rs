use crate::domain::message::{Message, MessageKey};
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// How far one viewer has read into one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMarker {
    pub conversation_id: Uuid,
    pub viewer_id: Uuid,
    pub last_read_at: OffsetDateTime,
    pub last_read_message_id: i64,
}

impl ReadMarker {
    #[must_use]
    pub const fn at(conversation_id: Uuid, viewer_id: Uuid, key: MessageKey) -> Self {
        Self { conversation_id, viewer_id, last_read_at: key.created_at, last_read_message_id: key.id }
    }

    #[must_use]
    pub const fn key(&self) -> MessageKey {
        MessageKey { created_at: self.last_read_at, id: self.last_read_message_id }
    }
}

/// Whether `message` counts as unread for `viewer_id` given its marker.
#[must_use]
pub fn is_unread(message: &Message, viewer_id: Uuid, marker: Option<MessageKey>) -> bool {
    message.sender_id != viewer_id && marker.is_none_or(|m| message.key() > m)
}

/// Per-conversation unread counts for one viewer, taken from a single store read.
///
/// The total is always derived from the same counts, so the two can never disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnreadSnapshot {
    counts: BTreeMap<Uuid, u64>,
}

impl UnreadSnapshot {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Uuid, u64)> + '_ {
        self.counts.iter().map(|(id, count)| (*id, *count))
    }
}

impl FromIterator<(Uuid, u64)> for UnreadSnapshot {
    fn from_iter<I: IntoIterator<Item = (Uuid, u64)>>(iter: I) -> Self {
        Self { counts: iter.into_iter().collect() }
    }
}
