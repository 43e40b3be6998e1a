use crate::domain::message::{Message, MessageKey};
use std::collections::{BTreeMap, HashMap};

/// The locally held messages of one conversation: ordered by [`MessageKey`], unique by id.
///
/// Fetched pages and pushed messages both go through [`MessageTimeline::merge`], which is
/// idempotent and order-insensitive: any interleaving of the same inputs yields the same sequence.
#[derive(Debug, Clone, Default)]
pub struct MessageTimeline {
    ordered: BTreeMap<MessageKey, Message>,
    keys_by_id: HashMap<i64, MessageKey>,
}

impl MessageTimeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one message. Returns `false` when a message with the same id is already held.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.keys_by_id.contains_key(&message.id) {
            return false;
        }
        let key = message.key();
        self.keys_by_id.insert(message.id, key);
        self.ordered.insert(key, message);
        true
    }

    /// Merges a batch and returns how many messages were new.
    pub fn merge<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        messages.into_iter().map(|m| self.insert(m)).filter(|&added| added).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.ordered.values()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }
}

impl FromIterator<Message> for MessageTimeline {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut timeline = Self::new();
        timeline.merge(iter);
        timeline
    }
}
