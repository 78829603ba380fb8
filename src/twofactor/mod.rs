//! TOTP enrollment, login challenges, and backup codes.
//!
//! Enrollment is two-phase: a generated secret stays pending until the user
//! proves possession with a first valid code, and only then does the account
//! flip to 2FA-required. Login challenges are single-use references held in
//! the volatile store; a challenge burns on first use whether or not the
//! accompanying code was right.

pub mod backup;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::core::error::{AuthError, AuthResult};
use crate::store::{CredentialStore, TwoFactorRow, VolatileStore};
use backup::BackupCodes;

/// Returned from `start_enrollment` for the authenticator-app handoff.
#[derive(Debug)]
pub struct EnrollmentStart {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

pub struct TwoFactorEngine {
    store: Arc<dyn CredentialStore>,
    volatile: Arc<dyn VolatileStore>,
    backup: BackupCodes,
    issuer: String,
    challenge_ttl: Duration,
}

impl TwoFactorEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        volatile: Arc<dyn VolatileStore>,
        backup_pepper: SecretString,
        issuer: String,
        challenge_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            volatile,
            backup: BackupCodes::new(backup_pepper),
            issuer,
            challenge_ttl: Duration::from_secs(challenge_ttl_seconds.max(1) as u64),
        }
    }

    /// Generate a pending secret. Does NOT enable 2FA; a later
    /// `verify_and_enable` with a valid code does. Restarting enrollment
    /// replaces any earlier pending secret.
    pub async fn start_enrollment(
        &self,
        user_id: Uuid,
        account_label: &str,
    ) -> AuthResult<EnrollmentStart> {
        if let Some(existing) = self.store.two_factor_for_user(user_id).await? {
            if existing.enabled {
                return Err(AuthError::Conflict(
                    "two-factor is already enabled".to_string(),
                ));
            }
        }
        let secret = Secret::generate_secret();
        let totp = self.build_totp(&secret.to_encoded().to_string(), account_label)?;
        let secret_base32 = totp.get_secret_base32();
        let otpauth_uri = totp.get_url();
        self.store
            .upsert_two_factor(
                user_id,
                TwoFactorRow {
                    secret: secret_base32.clone(),
                    backup_code_hashes: Vec::new(),
                    enabled: false,
                },
            )
            .await?;
        Ok(EnrollmentStart {
            secret_base32,
            otpauth_uri,
        })
    }

    /// Confirm enrollment with a first valid code. Enables 2FA and returns
    /// the one-time backup code batch.
    pub async fn verify_and_enable(&self, user_id: Uuid, code: &str) -> AuthResult<Vec<String>> {
        let row = self
            .store
            .two_factor_for_user(user_id)
            .await?
            .ok_or_else(|| {
                AuthError::InvalidOperation("no pending enrollment".to_string())
            })?;
        if row.enabled {
            return Err(AuthError::Conflict(
                "two-factor is already enabled".to_string(),
            ));
        }
        if !self.check_totp(&row.secret, code)? {
            return Err(AuthError::Authentication);
        }
        let batch = self.backup.generate_batch()?;
        self.store
            .upsert_two_factor(
                user_id,
                TwoFactorRow {
                    secret: row.secret,
                    backup_code_hashes: batch.hashes,
                    enabled: true,
                },
            )
            .await?;
        self.store.set_two_factor_enabled(user_id, true).await?;
        Ok(batch.codes)
    }

    /// Remove the credential and clear the account flag. Requires a valid
    /// current code so a hijacked session cannot silently weaken the account.
    pub async fn disable(&self, user_id: Uuid, code: &str) -> AuthResult<()> {
        let row = self.enabled_row(user_id).await?;
        if !self.verify_code(user_id, &row, code).await? {
            return Err(AuthError::Authentication);
        }
        self.store.delete_two_factor(user_id).await?;
        self.store.set_two_factor_enabled(user_id, false).await?;
        Ok(())
    }

    /// Replace the backup code batch wholesale. Old codes stop working.
    /// Gated like `disable`: a TOTP code or a remaining backup code both
    /// prove possession.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> AuthResult<Vec<String>> {
        let row = self.enabled_row(user_id).await?;
        if !self.verify_code(user_id, &row, code).await? {
            return Err(AuthError::Authentication);
        }
        let batch = self.backup.generate_batch()?;
        self.store
            .upsert_two_factor(
                user_id,
                TwoFactorRow {
                    secret: row.secret,
                    backup_code_hashes: batch.hashes,
                    enabled: true,
                },
            )
            .await?;
        Ok(batch.codes)
    }

    /// Mint a login challenge after password success. The raw token goes to
    /// the client; only its hash is stored.
    pub async fn create_challenge(&self, user_id: Uuid) -> AuthResult<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);
        self.volatile
            .put_token(&hash_token(&token), user_id, self.challenge_ttl)
            .await?;
        Ok(token)
    }

    /// Complete a challenge. The token is consumed FIRST, so a wrong code
    /// burns the challenge and the client must restart from password login.
    pub async fn verify_challenge(&self, token: &str, code: &str) -> AuthResult<Uuid> {
        let user_id = self
            .volatile
            .take_token(&hash_token(token))
            .await?
            .ok_or(AuthError::Authentication)?;
        let row = self.enabled_row(user_id).await?;
        if !self.verify_code(user_id, &row, code).await? {
            return Err(AuthError::Authentication);
        }
        Ok(user_id)
    }

    /// TOTP first, then backup codes. A matching backup code is consumed
    /// atomically so it can never authenticate twice.
    async fn verify_code(
        &self,
        user_id: Uuid,
        row: &TwoFactorRow,
        code: &str,
    ) -> AuthResult<bool> {
        if self.check_totp(&row.secret, code)? {
            return Ok(true);
        }
        let Some(index) = self.backup.find_match(code, &row.backup_code_hashes) else {
            return Ok(false);
        };
        let consumed = self
            .store
            .remove_backup_code(user_id, &row.backup_code_hashes[index])
            .await?;
        Ok(consumed)
    }

    async fn enabled_row(&self, user_id: Uuid) -> AuthResult<TwoFactorRow> {
        let row = self
            .store
            .two_factor_for_user(user_id)
            .await?
            .filter(|row| row.enabled)
            .ok_or_else(|| {
                AuthError::InvalidOperation("two-factor is not enabled".to_string())
            })?;
        Ok(row)
    }

    fn check_totp(&self, secret_base32: &str, code: &str) -> AuthResult<bool> {
        let totp = self.build_totp(secret_base32, "account")?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    fn build_totp(&self, secret_base32: &str, account_label: &str) -> AuthResult<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| AuthError::Unavailable(anyhow::anyhow!("totp secret: {err}")))?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|err| AuthError::Unavailable(anyhow::anyhow!("totp init: {err}")))
    }
}

impl std::fmt::Debug for TwoFactorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoFactorEngine")
            .field("issuer", &self.issuer)
            .field("challenge_ttl", &self.challenge_ttl)
            .finish_non_exhaustive()
    }
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{hash_token, TwoFactorEngine};
    use crate::core::error::AuthError;
    use crate::store::{CredentialStore, MemoryStore, NewUser};
    use crate::trust::TrustLevel;
    use secrecy::SecretString;
    use std::sync::Arc;
    use totp_rs::{Algorithm, Secret, TOTP};
    use uuid::Uuid;

    fn engine(store: Arc<MemoryStore>) -> TwoFactorEngine {
        TwoFactorEngine::new(
            store.clone(),
            store,
            SecretString::from("unit-test-pepper"),
            "Vigil".to_string(),
            300,
        )
    }

    async fn seeded_user(store: &MemoryStore) -> Uuid {
        store
            .insert_user(NewUser {
                email: "2fa@example.com".to_string(),
                password_hash: Some("hash".to_string()),
                oauth_subject: None,
                trust_level: TrustLevel::Unverified,
                email_verified: false,
                device_fingerprint: None,
            })
            .await
            .unwrap()
            .id
    }

    fn current_code(secret_base32: &str) -> String {
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap(),
            Some("Vigil".to_string()),
            "account".to_string(),
        )
        .unwrap();
        totp.generate_current().unwrap()
    }

    #[tokio::test]
    async fn enrollment_is_two_phase() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user_id = seeded_user(&store).await;

        let start = engine.start_enrollment(user_id, "2fa@example.com").await.unwrap();
        assert!(start.otpauth_uri.starts_with("otpauth://totp/"));

        // Pending secret does not enable anything yet.
        let row = store.two_factor_for_user(user_id).await.unwrap().unwrap();
        assert!(!row.enabled);

        let codes = engine
            .verify_and_enable(user_id, &current_code(&start.secret_base32))
            .await
            .unwrap();
        assert_eq!(codes.len(), 10);

        let row = store.two_factor_for_user(user_id).await.unwrap().unwrap();
        assert!(row.enabled);
        assert_eq!(row.backup_code_hashes.len(), 10);
    }

    #[tokio::test]
    async fn wrong_first_code_keeps_enrollment_pending() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user_id = seeded_user(&store).await;

        engine.start_enrollment(user_id, "2fa@example.com").await.unwrap();
        assert!(matches!(
            engine.verify_and_enable(user_id, "000000").await,
            Err(AuthError::Authentication)
        ));
        let row = store.two_factor_for_user(user_id).await.unwrap().unwrap();
        assert!(!row.enabled);
    }

    #[tokio::test]
    async fn challenge_burns_on_first_use() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user_id = seeded_user(&store).await;

        let start = engine.start_enrollment(user_id, "2fa@example.com").await.unwrap();
        engine
            .verify_and_enable(user_id, &current_code(&start.secret_base32))
            .await
            .unwrap();

        let token = engine.create_challenge(user_id).await.unwrap();
        // Wrong code consumes the challenge.
        assert!(matches!(
            engine.verify_challenge(&token, "000000").await,
            Err(AuthError::Authentication)
        ));
        // Even the right code is refused afterwards.
        assert!(matches!(
            engine
                .verify_challenge(&token, &current_code(&start.secret_base32))
                .await,
            Err(AuthError::Authentication)
        ));
    }

    #[tokio::test]
    async fn backup_code_completes_challenge_once() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user_id = seeded_user(&store).await;

        let start = engine.start_enrollment(user_id, "2fa@example.com").await.unwrap();
        let codes = engine
            .verify_and_enable(user_id, &current_code(&start.secret_base32))
            .await
            .unwrap();

        let token = engine.create_challenge(user_id).await.unwrap();
        assert_eq!(
            engine.verify_challenge(&token, &codes[0]).await.unwrap(),
            user_id
        );

        // Same backup code cannot be used again.
        let token = engine.create_challenge(user_id).await.unwrap();
        assert!(matches!(
            engine.verify_challenge(&token, &codes[0]).await,
            Err(AuthError::Authentication)
        ));
    }

    #[tokio::test]
    async fn backup_code_can_authorize_regeneration() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user_id = seeded_user(&store).await;

        let start = engine.start_enrollment(user_id, "2fa@example.com").await.unwrap();
        let codes = engine
            .verify_and_enable(user_id, &current_code(&start.secret_base32))
            .await
            .unwrap();

        assert!(matches!(
            engine.regenerate_backup_codes(user_id, "000000").await,
            Err(AuthError::Authentication)
        ));
        // A remaining backup code works, same as for disable; the fresh
        // batch replaces the old one entirely.
        let fresh = engine
            .regenerate_backup_codes(user_id, &codes[0])
            .await
            .unwrap();
        assert_eq!(fresh.len(), 10);

        let token = engine.create_challenge(user_id).await.unwrap();
        assert!(matches!(
            engine.verify_challenge(&token, &codes[1]).await,
            Err(AuthError::Authentication)
        ));
    }

    #[tokio::test]
    async fn disable_requires_valid_code() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let user_id = seeded_user(&store).await;

        let start = engine.start_enrollment(user_id, "2fa@example.com").await.unwrap();
        engine
            .verify_and_enable(user_id, &current_code(&start.secret_base32))
            .await
            .unwrap();

        assert!(matches!(
            engine.disable(user_id, "000000").await,
            Err(AuthError::Authentication)
        ));
        engine
            .disable(user_id, &current_code(&start.secret_base32))
            .await
            .unwrap();
        assert!(store.two_factor_for_user(user_id).await.unwrap().is_none());
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let hash = hash_token("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("abc"));
        assert_ne!(hash, hash_token("abd"));
    }
}
