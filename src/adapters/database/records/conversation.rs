use crate::domain::conversation::{Conversation, ConversationStatus, ConversationSummary};
use sqlx::FromRow;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub struct ConversationRecord {
    pub(crate) id: Uuid,
    pub(crate) client_id: Uuid,
    pub(crate) admin_id: Option<Uuid>,
    pub(crate) subject: Option<String>,
    pub(crate) status: String,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
    pub(crate) last_message_at: Option<OffsetDateTime>,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Self {
            id: record.id,
            client_id: record.client_id,
            admin_id: record.admin_id,
            subject: record.subject,
            status: ConversationStatus::from_str(&record.status).unwrap_or(ConversationStatus::Active),
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_message_at: record.last_message_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ConversationSummaryRecord {
    #[sqlx(flatten)]
    pub(crate) conversation: ConversationRecord,
    pub(crate) unread_count: i64,
}

impl From<ConversationSummaryRecord> for ConversationSummary {
    fn from(record: ConversationSummaryRecord) -> Self {
        Self {
            conversation: record.conversation.into(),
            unread_count: u64::try_from(record.unread_count).unwrap_or(0),
        }
    }
}
