use crate::domain::conversation::ConversationStatus;
use crate::domain::read_state::UnreadSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Required when an admin opens a conversation for a client; defaults to the caller.
    pub client_id: Option<Uuid>,
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ConversationStatus,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub total: u64,
    pub conversations: BTreeMap<Uuid, u64>,
}

impl From<UnreadSnapshot> for UnreadResponse {
    fn from(snapshot: UnreadSnapshot) -> Self {
        Self { total: snapshot.total(), conversations: snapshot.iter().collect() }
    }
}
