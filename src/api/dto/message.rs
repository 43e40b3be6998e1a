use crate::domain::message::TEXT_MESSAGE_TYPE;
use crate::domain::read_state::ReadMarker;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

fn default_message_type() -> String {
    TEXT_MESSAGE_TYPE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReadStateResponse {
    pub conversation_id: Uuid,
    pub unread_count: u64,
    pub last_read_message_id: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_read_at: Option<OffsetDateTime>,
}

impl ReadStateResponse {
    #[must_use]
    pub fn new(conversation_id: Uuid, unread_count: u64, marker: Option<ReadMarker>) -> Self {
        Self {
            conversation_id,
            unread_count,
            last_read_message_id: marker.map(|m| m.last_read_message_id),
            last_read_at: marker.map(|m| m.last_read_at),
        }
    }
}
