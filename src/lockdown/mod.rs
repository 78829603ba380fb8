//! Emergency panic lockdown.
//!
//! Panic destroys every session, including the one that made the call, and
//! locks the account with the panic reason. Unlock is session-independent
//! (the account has none left) and only clears panic locks; locks placed
//! for other reasons stay.

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::core::error::{AuthError, AuthResult};
use crate::core::normalize_email;
use crate::core::password::verify_password;
use crate::store::CredentialStore;

pub const PANIC_LOCK_REASON: &str = "panic";

pub struct LockdownController {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<crate::session::SessionManager>,
}

impl LockdownController {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, sessions: Arc<crate::session::SessionManager>) -> Self {
        Self { store, sessions }
    }

    /// Lock first, then revoke. The lock lands before session destruction
    /// so a login racing the panic call hits the locked account even if it
    /// slips past the revocation.
    pub async fn panic(&self, user_id: Uuid) -> AuthResult<u64> {
        self.store
            .set_lock(user_id, true, Some(PANIC_LOCK_REASON))
            .await?;
        let revoked = self.sessions.revoke_all(user_id, None).await?;
        warn!(%user_id, revoked, "panic lockdown engaged");
        Ok(revoked)
    }

    /// Password-gated unlock. Credential failures are generic; a lock held
    /// for a non-panic reason is reported as still locked rather than as a
    /// credential problem.
    pub async fn unlock(&self, email: &str, password: &str) -> AuthResult<()> {
        // Same normalization as signup/login; a malformed address is just a
        // credential failure here.
        let email = normalize_email(email).map_err(|_| AuthError::Authentication)?;
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(AuthError::Authentication)?;
        let hash = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::Authentication)?;
        if !verify_password(password, hash) {
            return Err(AuthError::Authentication);
        }
        if !user.is_locked {
            return Ok(());
        }
        if user.lock_reason.as_deref() != Some(PANIC_LOCK_REASON) {
            return Err(AuthError::AccountLocked);
        }
        self.store.set_lock(user.id, false, None).await?;
        Ok(())
    }
}

impl std::fmt::Debug for LockdownController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockdownController").finish_non_exhaustive()
    }
}
