use crate::domain::read_state::ReadMarker;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ReadMarkerRecord {
    pub(crate) conversation_id: Uuid,
    pub(crate) viewer_id: Uuid,
    pub(crate) last_read_at: OffsetDateTime,
    pub(crate) last_read_message_id: i64,
}

impl From<ReadMarkerRecord> for ReadMarker {
    fn from(record: ReadMarkerRecord) -> Self {
        Self {
            conversation_id: record.conversation_id,
            viewer_id: record.viewer_id,
            last_read_at: record.last_read_at,
            last_read_message_id: record.last_read_message_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UnreadCountRecord {
    pub(crate) conversation_id: Uuid,
    pub(crate) unread_count: i64,
}
