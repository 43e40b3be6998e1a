use crate::api::AppState;
use crate::api::dto::conversation::{CreateConversationRequest, UnreadResponse, UpdateStatusRequest};
use crate::api::middleware::AuthUser;
use crate::domain::conversation::AssignOutcome;
use crate::error::{AppError, Result};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Opens a conversation. Clients open their own; admins name the client.
///
/// # Errors
/// Returns `AppError::InvalidArgument` if the client id is empty.
/// Returns `AppError::Forbidden` if a client names someone else.
pub async fn create_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    let viewer = auth_user.viewer;
    let client_id = payload.client_id.unwrap_or(viewer.id);
    let conversation = state.conversation_service.create(&viewer, client_id, payload.subject).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// # Errors
/// Returns `AppError::Database` if the store fails.
pub async fn list_conversations(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let summaries = state.conversation_service.list_for_viewer(&auth_user.viewer).await?;
    Ok(Json(summaries))
}

/// # Errors
/// Returns `AppError::NotFound` or `AppError::Forbidden` if the conversation cannot be viewed.
pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let conversation = state.conversation_service.get(conversation_id, &auth_user.viewer).await?;
    Ok(Json(conversation))
}

/// Claims the conversation for the calling admin. Losing the race is a 409 naming the owner.
///
/// # Errors
/// Returns `AppError::AlreadyAssigned` if another admin (or the caller) already owns it.
/// Returns `AppError::Forbidden` for non-admins.
pub async fn assign_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    match state.assignment_service.assign(conversation_id, &auth_user.viewer).await? {
        AssignOutcome::Assigned(conversation) => Ok(Json(conversation)),
        AssignOutcome::AlreadyAssigned { admin_id } => Err(AppError::AlreadyAssigned { admin_id }),
    }
}

/// # Errors
/// Returns `AppError::Conflict` for anything but the next step of the lifecycle.
/// Returns `AppError::Forbidden` for non-admins.
pub async fn update_status(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse> {
    let conversation =
        state.conversation_service.transition_status(conversation_id, &auth_user.viewer, payload.status).await?;
    Ok(Json(conversation))
}

/// Unread counts across every visible conversation, with their sum.
///
/// # Errors
/// Returns `AppError::Database` if the store fails.
pub async fn unread(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let snapshot = state.read_state_service.snapshot(&auth_user.viewer).await?;
    Ok(Json(UnreadResponse::from(snapshot)))
}
