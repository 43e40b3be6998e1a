use crate::api::AppState;
use crate::api::dto::message::{ListMessagesQuery, ReadStateResponse, SendMessageRequest};
use crate::api::middleware::AuthUser;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Sends a message to a conversation.
///
/// # Errors
/// Returns `AppError::InvalidArgument` if the content is blank or the type unsupported.
/// Returns `AppError::NotFound` if the conversation does not exist.
/// Returns `AppError::Conflict` if the conversation no longer accepts messages.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state
        .message_service
        .send(conversation_id, &auth_user.viewer, &payload.content, &payload.message_type)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// # Errors
/// Returns `AppError::NotFound` or `AppError::Forbidden` if the conversation cannot be viewed.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse> {
    let messages =
        state.message_service.list(conversation_id, &auth_user.viewer, query.limit, query.offset).await?;
    Ok(Json(messages))
}

/// Marks everything currently in the conversation as read.
///
/// # Errors
/// Returns `AppError::NotFound` or `AppError::Forbidden` if the conversation cannot be viewed.
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let viewer = auth_user.viewer;
    let marker = state.read_state_service.mark_read(conversation_id, &viewer).await?;
    let unread_count = state.read_state_service.unread_count(conversation_id, &viewer).await?;
    Ok(Json(ReadStateResponse::new(conversation_id, unread_count, marker)))
}
