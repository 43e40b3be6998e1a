use crate::api::AppState;
use crate::domain::viewer::{Claims, Viewer};
use crate::error::AppError;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

/// The authenticated caller, taken from a `Bearer` token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub viewer: Viewer,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts.headers.get(header::AUTHORIZATION).ok_or(AppError::AuthError)?;

        let auth_str = auth_header.to_str().map_err(|_| AppError::AuthError)?;
        let token = auth_str.strip_prefix("Bearer ").ok_or(AppError::AuthError)?;

        let claims = Claims::decode(token, &state.config.auth.jwt_secret)?;
        tracing::Span::current().record("user_id", tracing::field::display(claims.sub));

        Ok(Self { viewer: claims.viewer() })
    }
}
