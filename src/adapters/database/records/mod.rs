pub mod conversation;
pub mod message;
pub mod read_marker;

pub use conversation::{ConversationRecord, ConversationSummaryRecord};
pub use message::MessageRecord;
pub use read_marker::{ReadMarkerRecord, UnreadCountRecord};
