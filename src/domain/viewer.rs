use crate::domain::conversation::Conversation;
use crate::error::{AppError, Result};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// The caller identity supplied by the external identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewer {
    pub id: Uuid,
    pub is_admin: bool,
}

impl Viewer {
    #[must_use]
    pub const fn client(id: Uuid) -> Self {
        Self { id, is_admin: false }
    }

    #[must_use]
    pub const fn admin(id: Uuid) -> Self {
        Self { id, is_admin: true }
    }

    /// Admins see every conversation; clients only their own.
    #[must_use]
    pub fn can_access(&self, conversation: &Conversation) -> bool {
        self.is_admin || conversation.is_owned_by(self.id)
    }

    /// Fails with `Forbidden` unless the viewer may read or write `conversation`.
    ///
    /// # Errors
    /// Returns `AppError::Forbidden` if the viewer is neither the owning client nor an admin.
    pub fn ensure_access(&self, conversation: &Conversation) -> Result<()> {
        if self.can_access(conversation) { Ok(()) } else { Err(AppError::Forbidden) }
    }

    /// # Errors
    /// Returns `AppError::Forbidden` if the viewer is not an admin.
    pub fn ensure_admin(&self) -> Result<()> {
        if self.is_admin { Ok(()) } else { Err(AppError::Forbidden) }
    }
}

/// Identity token claims. Tokens are issued elsewhere; this service only verifies them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize,
}

impl Claims {
    #[must_use]
    pub fn new(viewer: Viewer, ttl_secs: u64) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        let exp = usize::try_from(now.saturating_add(ttl_secs)).unwrap_or(usize::MAX);
        Self { sub: viewer.id, admin: viewer.is_admin, exp }
    }

    /// Signs the claims. Used by tests and tooling standing in for the identity provider.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if signing fails.
    pub fn encode(&self, secret: &str) -> Result<String> {
        encode(&Header::default(), self, &EncodingKey::from_secret(secret.as_bytes())).map_err(|_| AppError::Internal)
    }

    /// # Errors
    /// Returns `AppError::AuthError` if the token is malformed, expired or wrongly signed.
    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let data = decode::<Self>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
            .map_err(|_| AppError::AuthError)?;
        Ok(data.claims)
    }

    #[must_use]
    pub const fn viewer(&self) -> Viewer {
        Viewer { id: self.sub, is_admin: self.admin }
    }
}
