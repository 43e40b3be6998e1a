pub mod database;
pub mod memory;
pub mod pubsub;
pub mod redis;
pub mod store;
