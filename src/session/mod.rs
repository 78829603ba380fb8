//! Session lifecycle: issue, verify, list, revoke.
//!
//! A session row is the unit of revocation. Bearer tokens only reference a
//! row; `verify` requires both a valid signature and a live row, so a
//! revoked session invalidates its tokens instantly even while the
//! signature is still within its own expiry.

pub mod token;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::error::{AuthError, AuthResult};
use crate::store::{CredentialStore, SessionRow};
use token::TokenSigner;

/// Request-side device description captured at login time.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_type: String,
    pub device_name: String,
    pub ip_address: String,
    pub user_agent: String,
}

/// The authenticated caller derived from a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

/// A freshly issued session: raw token plus its reference row id.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Session row shaped for listing: masked IP, `is_current` flag.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub device_type: String,
    pub device_name: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    signer: TokenSigner,
    session_ttl: Duration,
    remember_me_ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        signer: TokenSigner,
        session_ttl_seconds: i64,
        remember_me_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            signer,
            session_ttl: Duration::seconds(session_ttl_seconds),
            remember_me_ttl: Duration::seconds(remember_me_ttl_seconds),
        }
    }

    /// Create a session row and sign a token referencing it.
    pub async fn issue(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
        fingerprint_hash: &str,
        remember_me: bool,
    ) -> AuthResult<IssuedSession> {
        let created_at = Utc::now();
        let ttl = if remember_me {
            self.remember_me_ttl
        } else {
            self.session_ttl
        };
        let row = SessionRow {
            id: Uuid::new_v4(),
            user_id,
            device_type: device.device_type.clone(),
            device_name: device.device_name.clone(),
            ip_address: device.ip_address.clone(),
            fingerprint_hash: fingerprint_hash.to_string(),
            created_at,
            expires_at: created_at + ttl,
        };
        self.store.insert_session(row.clone()).await?;
        let token = self.signer.sign(user_id, row.id, row.expires_at)?;
        Ok(IssuedSession {
            token,
            session_id: row.id,
            expires_at: row.expires_at,
        })
    }

    /// Verify a bearer token: signature first, then the referenced session
    /// row. A cryptographically valid token for a revoked or expired
    /// session is rejected.
    pub async fn verify(&self, token: &str) -> AuthResult<Principal> {
        let claims = self.signer.decode(token)?;
        let row = self
            .store
            .find_session(claims.sid)
            .await?
            .ok_or(AuthError::Authentication)?;
        if row.user_id != claims.sub {
            return Err(AuthError::Authentication);
        }
        if row.is_expired(Utc::now()) {
            // Expired rows are reaped opportunistically; failure to delete
            // does not matter for the verdict.
            let _ = self.store.delete_session(row.id).await;
            return Err(AuthError::Authentication);
        }
        Ok(Principal {
            user_id: claims.sub,
            session_id: claims.sid,
        })
    }

    /// Revoke a single session belonging to the requester. The requester's
    /// own active session is refused: logging out mid-request would strand
    /// the caller, so that path goes through `logout` instead.
    pub async fn revoke(&self, session_id: Uuid, requester: &Principal) -> AuthResult<()> {
        if session_id == requester.session_id {
            return Err(AuthError::InvalidOperation(
                "use logout to end the current session".to_string(),
            ));
        }
        let Some(row) = self.store.find_session(session_id).await? else {
            // Already gone; revocation is idempotent.
            return Ok(());
        };
        if row.user_id != requester.user_id {
            return Err(AuthError::Forbidden);
        }
        self.store.delete_session(session_id).await?;
        Ok(())
    }

    /// Bulk revocation. `except = None` destroys everything (panic flow);
    /// "log out other devices" passes the current session id.
    pub async fn revoke_all(&self, user_id: Uuid, except: Option<Uuid>) -> AuthResult<u64> {
        Ok(self.store.delete_sessions_for_user(user_id, except).await?)
    }

    /// Unexpired sessions for a user, IPs masked, current session flagged.
    pub async fn list(&self, requester: &Principal) -> AuthResult<Vec<SessionView>> {
        let now = Utc::now();
        let rows = self.store.sessions_for_user(requester.user_id).await?;
        Ok(rows
            .into_iter()
            .filter(|row| !row.is_expired(now))
            .map(|row| SessionView {
                id: row.id,
                device_type: row.device_type,
                device_name: row.device_name,
                ip_address: mask_ip(&row.ip_address),
                created_at: row.created_at,
                expires_at: row.expires_at,
                is_current: row.id == requester.session_id,
            })
            .collect())
    }

    /// Idempotent logout: delete the referenced session if the token still
    /// decodes; an already-dead token is a no-op, never an error.
    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        if let Ok(claims) = self.signer.decode(token) {
            let _ = self.store.delete_session(claims.sid).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_ttl", &self.session_ttl)
            .field("remember_me_ttl", &self.remember_me_ttl)
            .finish_non_exhaustive()
    }
}

/// Mask the host portion of an address for display: `203.0.113.7` becomes
/// `203.0.113.xxx`, IPv6 keeps its leading groups.
#[must_use]
pub fn mask_ip(ip: &str) -> String {
    if let Some(last_dot) = ip.rfind('.') {
        if ip.contains(':') {
            return mask_ipv6(ip);
        }
        return format!("{}.xxx", &ip[..last_dot]);
    }
    if ip.contains(':') {
        return mask_ipv6(ip);
    }
    "unknown".to_string()
}

fn mask_ipv6(ip: &str) -> String {
    let groups: Vec<&str> = ip.split(':').take(2).collect();
    format!("{}::xxxx", groups.join(":"))
}
