pub mod conversation;
pub mod event;
pub mod message;
pub mod read_state;
pub mod timeline;
pub mod viewer;
