use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
    Archived,
}

impl ConversationStatus {
    /// The only status reachable from `self`, if any. Both steps are terminal.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Active => Some(Self::Closed),
            Self::Closed => Some(Self::Archived),
            Self::Archived => None,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    #[must_use]
    pub const fn accepts_messages(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid conversation status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub admin_id: Option<Uuid>,
    pub subject: Option<String>,
    pub status: ConversationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
}

impl Conversation {
    /// Whether `viewer_id` takes part in this conversation as its client.
    #[must_use]
    pub fn is_owned_by(&self, viewer_id: Uuid) -> bool {
        self.client_id == viewer_id
    }
}

/// A conversation as listed for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub unread_count: u64,
}

/// Orders summaries newest activity first, with the id as a stable tie-breaker.
pub fn sort_for_listing(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| {
        b.conversation
            .updated_at
            .cmp(&a.conversation.updated_at)
            .then_with(|| a.conversation.id.cmp(&b.conversation.id))
    });
}

/// Trims a subject and drops it entirely when blank.
#[must_use]
pub fn normalize_subject(subject: Option<String>) -> Option<String> {
    subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Outcome of an assignment attempt. Losing the race is a normal outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned(Conversation),
    AlreadyAssigned { admin_id: Uuid },
}
