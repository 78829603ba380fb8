//! Error taxonomy for the security core.
//!
//! Every fallible core operation returns [`AuthError`]. The variants map
//! one-to-one onto HTTP status codes so handlers never have to invent their
//! own mapping. Credential and code failures are intentionally generic:
//! the response must not reveal which factor was wrong.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::store::StoreError;

/// Result alias used across the core components.
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or unacceptable input.
    #[error("{0}")]
    Validation(String),

    /// Duplicate identity (email already registered).
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials, code, challenge, or token. Always generic.
    #[error("invalid credentials")]
    Authentication,

    /// Account is locked (panic lockdown or moderation).
    #[error("account locked")]
    AccountLocked,

    /// Too many failed attempts for this identity.
    #[error("too many attempts")]
    RateLimited { retry_after_seconds: i64 },

    /// Acting on another principal's resource.
    #[error("forbidden")]
    Forbidden,

    /// Valid request that the current state does not allow, e.g. revoking
    /// the caller's own active session instead of logging out.
    #[error("{0}")]
    InvalidOperation(String),

    /// Datastore or critical dependency failure. Never conflated with
    /// "not found": a credential lookup against a dead store is fatal.
    #[error("service unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::AccountLocked => StatusCode::LOCKED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unavailable(err)
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => Self::Conflict("identity already registered".to_string()),
            StoreError::Unavailable(source) => Self::Unavailable(source),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Unavailable(ref source) = self {
            error!("dependency unavailable: {source:#}");
        }
        let status = self.status();
        let body = match &self {
            Self::RateLimited {
                retry_after_seconds,
            } => format!("Too many attempts, retry in {retry_after_seconds}s"),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
