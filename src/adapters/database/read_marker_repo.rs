use crate::adapters::database::records::ReadMarkerRecord;
use crate::domain::read_state::ReadMarker;
use crate::error::{AppError, Result};
use sqlx::PgConnection;

#[derive(Clone, Debug, Default)]
pub struct ReadMarkerRepository {}

impl ReadMarkerRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Upserts the marker, keeping whichever of the stored and given positions is later.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    /// Returns `AppError::Database` if the upsert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, marker), fields(conversation_id = %marker.conversation_id))]
    pub(crate) async fn advance(&self, conn: &mut PgConnection, marker: &ReadMarker) -> Result<ReadMarker> {
        let advanced = sqlx::query_as::<_, ReadMarkerRecord>(
            r"
            INSERT INTO read_markers (conversation_id, viewer_id, last_read_at, last_read_message_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, viewer_id) DO UPDATE
            SET last_read_at = EXCLUDED.last_read_at,
                last_read_message_id = EXCLUDED.last_read_message_id
            WHERE (read_markers.last_read_at, read_markers.last_read_message_id)
                < (EXCLUDED.last_read_at, EXCLUDED.last_read_message_id)
            RETURNING conversation_id, viewer_id, last_read_at, last_read_message_id
            ",
        )
        .bind(marker.conversation_id)
        .bind(marker.viewer_id)
        .bind(marker.last_read_at)
        .bind(marker.last_read_message_id)
        .fetch_optional(&mut *conn)
        .await;

        match advanced {
            Ok(Some(record)) => Ok(record.into()),
            // The stored marker is already at or past the given one.
            Ok(None) => {
                let stored = sqlx::query_as::<_, ReadMarkerRecord>(
                    r"
                    SELECT conversation_id, viewer_id, last_read_at, last_read_message_id
                    FROM read_markers
                    WHERE conversation_id = $1 AND viewer_id = $2
                    ",
                )
                .bind(marker.conversation_id)
                .bind(marker.viewer_id)
                .fetch_one(conn)
                .await?;
                Ok(stored.into())
            }
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23503") => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
