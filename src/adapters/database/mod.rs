pub mod conversation_repo;
pub mod message_repo;
pub mod read_marker_repo;
pub mod records;

use crate::adapters::store::ChatStore;
use crate::config::StoreConfig;
use crate::domain::conversation::{AssignOutcome, Conversation, ConversationStatus, ConversationSummary};
use crate::domain::message::{Message, MessageKey, NewMessage};
use crate::domain::read_state::{ReadMarker, UnreadSnapshot};
use crate::domain::viewer::Viewer;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use conversation_repo::ConversationRepository;
use message_repo::MessageRepository;
use read_marker_repo::ReadMarkerRepository;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use uuid::Uuid;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(config: &StoreConfig, url: &str) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .connect(url)
        .await
}

/// Postgres-backed [`ChatStore`].
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: DbPool,
    conversations: ConversationRepository,
    messages: MessageRepository,
    read_markers: ReadMarkerRepository,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self {
            pool,
            conversations: ConversationRepository::new(),
            messages: MessageRepository::new(),
            read_markers: ReadMarkerRepository::new(),
        }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn create_conversation(&self, client_id: Uuid, subject: Option<String>) -> Result<Conversation> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.create(&mut conn, client_id, subject).await
    }

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.find_by_id(&mut conn, conversation_id).await
    }

    async fn list_for_viewer(&self, viewer: &Viewer) -> Result<Vec<ConversationSummary>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.list_for_viewer(&mut conn, viewer).await
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        match self.conversations.lock_status(&mut tx, message.conversation_id).await? {
            None => return Err(AppError::NotFound),
            Some(status) if !status.accepts_messages() => {
                return Err(AppError::Conflict(format!("Conversation is {status}")));
            }
            Some(_) => {}
        }

        let stored = self.messages.create(&mut tx, &message).await?;
        self.conversations.touch_activity(&mut tx, stored.conversation_id, stored.created_at).await?;
        tx.commit().await?;

        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Message>> {
        let mut conn = self.pool.acquire().await?;
        self.messages.list(&mut conn, conversation_id, limit, offset).await
    }

    async fn latest_message_key(&self, conversation_id: Uuid) -> Result<Option<MessageKey>> {
        let mut conn = self.pool.acquire().await?;
        self.messages.latest_key(&mut conn, conversation_id).await
    }

    async fn assign_if_unassigned(&self, conversation_id: Uuid, admin_id: Uuid) -> Result<AssignOutcome> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.assign_if_unassigned(&mut conn, conversation_id, admin_id).await
    }

    async fn transition_status(
        &self,
        conversation_id: Uuid,
        from: ConversationStatus,
        to: ConversationStatus,
    ) -> Result<Option<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.transition_status(&mut conn, conversation_id, from, to).await
    }

    async fn advance_read_marker(&self, marker: ReadMarker) -> Result<ReadMarker> {
        let mut conn = self.pool.acquire().await?;
        self.read_markers.advance(&mut conn, &marker).await
    }

    async fn unread_count(&self, conversation_id: Uuid, viewer_id: Uuid) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        self.messages.count_unread(&mut conn, conversation_id, viewer_id).await
    }

    async fn unread_snapshot(&self, viewer: &Viewer) -> Result<UnreadSnapshot> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.unread_snapshot(&mut conn, viewer).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
