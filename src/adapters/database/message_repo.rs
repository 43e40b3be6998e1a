use crate::adapters::database::records::MessageRecord;
use crate::domain::message::{Message, MessageKey, NewMessage};
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct MessageRepository {}

impl MessageRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Inserts a message. The store assigns its id and timestamp.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, message), fields(conversation_id = %message.conversation_id))]
    pub(crate) async fn create(&self, conn: &mut PgConnection, message: &NewMessage) -> Result<Message> {
        let result = sqlx::query_as::<_, MessageRecord>(
            r"
            INSERT INTO messages (conversation_id, sender_id, sender_is_admin, content, message_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, conversation_id, sender_id, sender_is_admin, content, message_type, created_at
            ",
        )
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.sender_is_admin)
        .bind(&message.content)
        .bind(message.message_type.to_string())
        .fetch_one(conn)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23503") => {
                // Foreign key violation: conversation_id does not exist
                Err(AppError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetches one page of a conversation's messages in `(created_at, id)` order.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn list(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r"
            SELECT id, conversation_id, sender_id, sender_is_admin, content, message_type, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn latest_key(&self, conn: &mut PgConnection, conversation_id: Uuid) -> Result<Option<MessageKey>> {
        let row: Option<(OffsetDateTime, i64)> = sqlx::query_as(
            r"
            SELECT created_at, id
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(conversation_id)
        .fetch_optional(conn)
        .await?;

        Ok(row.map(|(created_at, id)| MessageKey { created_at, id }))
    }

    /// Counts messages from anyone but `viewer_id` past the viewer's read marker.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn count_unread(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(m.id)
            FROM messages m
            LEFT JOIN read_markers r ON r.conversation_id = m.conversation_id AND r.viewer_id = $2
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND (r.viewer_id IS NULL OR (m.created_at, m.id) > (r.last_read_at, r.last_read_message_id))
            ",
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_one(conn)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
