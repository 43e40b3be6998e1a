use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a conversation. Only a hint: receivers re-fetch the directory either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    MessageAppended,
    Assigned,
    StatusChanged,
    /// Only the named viewer's unread counts moved.
    ReadStateChanged { viewer_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationChange {
    pub conversation_id: Uuid,
    pub kind: ChangeKind,
}

impl ConversationChange {
    #[must_use]
    pub const fn new(conversation_id: Uuid, kind: ChangeKind) -> Self {
        Self { conversation_id, kind }
    }

    /// Whether a directory held by `viewer_id` could look different after this change.
    #[must_use]
    pub fn concerns(&self, viewer_id: Uuid) -> bool {
        match self.kind {
            ChangeKind::ReadStateChanged { viewer_id: reader } => reader == viewer_id,
            _ => true,
        }
    }
}

/// What a subscription callback receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent<T> {
    /// The channel became (or became again) active. Events from before this point may have been
    /// missed, so the receiver should re-fetch its snapshot and merge it.
    Activated,
    Event(T),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_state_change_only_concerns_reader() {
        let reader = Uuid::new_v4();
        let change = ConversationChange::new(Uuid::new_v4(), ChangeKind::ReadStateChanged { viewer_id: reader });
        assert!(change.concerns(reader));
        assert!(!change.concerns(Uuid::new_v4()));

        let assigned = ConversationChange::new(Uuid::new_v4(), ChangeKind::Assigned);
        assert!(assigned.concerns(Uuid::new_v4()));
    }

    #[test]
    fn test_change_json_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ConversationChange::new(id, ChangeKind::Assigned)).expect("serialize");
        assert_eq!(json["conversation_id"], serde_json::json!(id));
        assert_eq!(json["kind"], serde_json::json!("assigned"));
    }
}
