use crate::adapters::database::records::{ConversationRecord, ConversationSummaryRecord, UnreadCountRecord};
use crate::domain::conversation::{AssignOutcome, Conversation, ConversationStatus, ConversationSummary};
use crate::domain::read_state::UnreadSnapshot;
use crate::domain::viewer::Viewer;
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str =
    "c.id, c.client_id, c.admin_id, c.subject, c.status, c.created_at, c.updated_at, c.last_message_at";

// Joins a viewer's marker and counts the other party's messages past it. $1 = viewer id.
const UNREAD_JOIN: &str = r"
    LEFT JOIN read_markers r ON r.conversation_id = c.id AND r.viewer_id = $1
    LEFT JOIN messages m ON m.conversation_id = c.id
        AND m.sender_id <> $1
        AND (r.viewer_id IS NULL OR (m.created_at, m.id) > (r.last_read_at, r.last_read_message_id))
";

#[derive(Clone, Debug, Default)]
pub struct ConversationRepository {}

impl ConversationRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Inserts a new active, unassigned conversation.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, subject))]
    pub(crate) async fn create(
        &self,
        conn: &mut PgConnection,
        client_id: Uuid,
        subject: Option<String>,
    ) -> Result<Conversation> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r"
            INSERT INTO conversations AS c (client_id, subject)
            VALUES ($1, $2)
            RETURNING c.id, c.client_id, c.admin_id, c.subject, c.status, c.created_at, c.updated_at, c.last_message_at
            ",
        )
        .bind(client_id)
        .bind(subject)
        .fetch_one(conn)
        .await?;

        Ok(record.into())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_id(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(Into::into))
    }

    /// Lists the conversations `viewer` may see together with the viewer's unread counts.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn list_for_viewer(
        &self,
        conn: &mut PgConnection,
        viewer: &Viewer,
    ) -> Result<Vec<ConversationSummary>> {
        let records = sqlx::query_as::<_, ConversationSummaryRecord>(&format!(
            r"
            SELECT {CONVERSATION_COLUMNS}, COUNT(m.id) AS unread_count
            FROM conversations c
            {UNREAD_JOIN}
            WHERE $2 OR c.client_id = $1
            GROUP BY c.id
            ORDER BY c.updated_at DESC, c.id ASC
            "
        ))
        .bind(viewer.id)
        .bind(viewer.is_admin)
        .fetch_all(conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn unread_snapshot(&self, conn: &mut PgConnection, viewer: &Viewer) -> Result<UnreadSnapshot> {
        let records = sqlx::query_as::<_, UnreadCountRecord>(&format!(
            r"
            SELECT c.id AS conversation_id, COUNT(m.id) AS unread_count
            FROM conversations c
            {UNREAD_JOIN}
            WHERE $2 OR c.client_id = $1
            GROUP BY c.id
            "
        ))
        .bind(viewer.id)
        .bind(viewer.is_admin)
        .fetch_all(conn)
        .await?;

        Ok(records.into_iter().map(|r| (r.conversation_id, u64::try_from(r.unread_count).unwrap_or(0))).collect())
    }

    /// Records message activity on a conversation.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn touch_activity(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE conversations
            SET last_message_at = GREATEST(COALESCE(last_message_at, $2), $2),
                updated_at = GREATEST(updated_at, $2)
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Locks the conversation row for the rest of the transaction and returns its status.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn lock_status(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<ConversationStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?;

        status.map(|s| s.parse().map_err(|_| AppError::Internal)).transpose()
    }

    /// Claims the conversation for `admin_id` if, and only if, nobody holds it yet.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn assign_if_unassigned(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        admin_id: Uuid,
    ) -> Result<AssignOutcome> {
        let claimed = sqlx::query_as::<_, ConversationRecord>(
            r"
            UPDATE conversations AS c
            SET admin_id = $2, updated_at = NOW()
            WHERE c.id = $1 AND c.admin_id IS NULL
            RETURNING c.id, c.client_id, c.admin_id, c.subject, c.status, c.created_at, c.updated_at, c.last_message_at
            ",
        )
        .bind(id)
        .bind(admin_id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(record) = claimed {
            return Ok(AssignOutcome::Assigned(record.into()));
        }

        // The admin column never reverts to NULL, so whatever is stored now is the winner.
        let current: Option<Option<Uuid>> = sqlx::query_scalar("SELECT admin_id FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;

        match current {
            None => Err(AppError::NotFound),
            Some(Some(winner)) => Ok(AssignOutcome::AlreadyAssigned { admin_id: winner }),
            Some(None) => Err(AppError::Internal),
        }
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn transition_status(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        from: ConversationStatus,
        to: ConversationStatus,
    ) -> Result<Option<Conversation>> {
        let updated = sqlx::query_as::<_, ConversationRecord>(
            r"
            UPDATE conversations AS c
            SET status = $3, updated_at = NOW()
            WHERE c.id = $1 AND c.status = $2
            RETURNING c.id, c.client_id, c.admin_id, c.subject, c.status, c.created_at, c.updated_at, c.last_message_at
            ",
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(record) = updated {
            return Ok(Some(record.into()));
        }

        if self.find_by_id(conn, id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        Ok(None)
    }
}
