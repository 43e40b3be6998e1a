use crate::domain::message::{Message, MessageType};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRecord {
    pub(crate) id: i64,
    pub(crate) conversation_id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) sender_is_admin: bool,
    pub(crate) content: String,
    pub(crate) message_type: String,
    pub(crate) created_at: OffsetDateTime,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            sender_is_admin: record.sender_is_admin,
            content: record.content,
            message_type: MessageType::from_str(&record.message_type).unwrap_or_default(),
            created_at: record.created_at,
        }
    }
}
