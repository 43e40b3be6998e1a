use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const TEXT_MESSAGE_TYPE: &str = "text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "{TEXT_MESSAGE_TYPE}"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            TEXT_MESSAGE_TYPE => Ok(Self::Text),
            _ => Err(format!("Unsupported message type: {s}")),
        }
    }
}

/// Position of a message within its conversation. Ordering is total: `created_at`, then `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub created_at: OffsetDateTime,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_is_admin: bool,
    pub content: String,
    pub message_type: MessageType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub const fn key(&self) -> MessageKey {
        MessageKey { created_at: self.created_at, id: self.id }
    }
}

/// A validated message ready to be appended by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_is_admin: bool,
    pub content: String,
    pub message_type: MessageType,
}

impl NewMessage {
    /// Builds a message from raw input, trimming the content.
    ///
    /// # Errors
    /// Returns `AppError::InvalidArgument` if the content is blank or longer than `max_chars`.
    pub fn new(
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_is_admin: bool,
        content: &str,
        message_type: MessageType,
        max_chars: usize,
    ) -> Result<Self> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidArgument("Message content must not be empty".into()));
        }
        if trimmed.chars().count() > max_chars {
            return Err(AppError::InvalidArgument(format!("Message content exceeds {max_chars} characters")));
        }
        Ok(Self {
            conversation_id,
            sender_id,
            sender_is_admin,
            content: trimmed.to_string(),
            message_type,
        })
    }
}
