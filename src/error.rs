use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Conversation already assigned to {admin_id}")]
    AlreadyAssigned { admin_id: Uuid },
    #[error("Transient network error: {0}")]
    TransientNetwork(String),
    #[error("Subscription failed: {0}")]
    Subscription(String),
    #[error("Authentication failed")]
    AuthError,
    #[error("Database error: {0}")]
    Database(sqlx::Error),
    #[error("Internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::TransientNetwork(e.to_string())
            }
            other => Self::Database(other),
        }
    }
}

impl AppError {
    /// Whether the caller may reasonably retry the same operation unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Subscription(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, admin_id) = match self {
            Self::InvalidArgument(msg) => {
                tracing::debug!(message = %msg, "Invalid argument");
                (StatusCode::BAD_REQUEST, msg, None)
            }
            Self::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Not found".to_string(), None)
            }
            Self::Forbidden => {
                tracing::debug!("Forbidden");
                (StatusCode::FORBIDDEN, "Forbidden".to_string(), None)
            }
            Self::Conflict(msg) => {
                tracing::debug!(message = %msg, "Conflict");
                (StatusCode::CONFLICT, msg, None)
            }
            Self::AlreadyAssigned { admin_id } => {
                tracing::debug!(%admin_id, "Assignment lost to another admin");
                (StatusCode::CONFLICT, "Conversation already assigned".to_string(), Some(admin_id))
            }
            Self::TransientNetwork(msg) => {
                tracing::warn!(error = %msg, "Store or channel unreachable");
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string(), None)
            }
            Self::Subscription(msg) => {
                tracing::warn!(error = %msg, "Subscription failed");
                (StatusCode::SERVICE_UNAVAILABLE, "Subscription unavailable".to_string(), None)
            }
            Self::AuthError => {
                tracing::debug!("Authentication failed");
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None)
            }
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), None)
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), None)
            }
        };

        let body = admin_id.map_or_else(
            || Json(json!({ "error": message })),
            |admin_id| Json(json!({ "error": message, "admin_id": admin_id })),
        );

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, AppError::TransientNetwork(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_already_assigned_maps_to_conflict() {
        let response = AppError::AlreadyAssigned { admin_id: Uuid::new_v4() }.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
