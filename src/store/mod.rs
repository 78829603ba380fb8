//! Credential store adapter boundary.
//!
//! The core owns these traits; durable state lives behind them. Two
//! implementations ship with the crate: a Postgres adapter used in
//! production and an in-memory adapter used by tests and local runs.
//!
//! [`CredentialStore`] persists users, sessions, and 2FA credentials.
//! [`VolatileStore`] is the fast counter/TTL store backing lockout counters
//! and single-use challenge tokens; its increment and take operations must
//! be atomic under concurrent requests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::trust::TrustLevel;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key")]
    Duplicate,
    #[error("store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A user row. Never hard-deleted; see [`CredentialStore::anonymize_user`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub oauth_subject: Option<String>,
    pub trust_level: TrustLevel,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub is_banned: bool,
    pub is_shadow_banned: bool,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a user. Trust level and verification flags are
/// explicit so the privileged-enrollment branch can grant them atomically.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub oauth_subject: Option<String>,
    pub trust_level: TrustLevel,
    pub email_verified: bool,
    pub device_fingerprint: Option<String>,
}

/// One session row per device/login. The row id doubles as the signed
/// token's reference id.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_type: String,
    pub device_name: String,
    pub ip_address: String,
    pub fingerprint_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRow {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Per-user TOTP credential plus hashed backup codes.
#[derive(Debug, Clone)]
pub struct TwoFactorRow {
    pub secret: String,
    pub backup_code_hashes: Vec<String>,
    pub enabled: bool,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> StoreResult<UserRecord>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>>;
    /// Lookup by normalized email.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    async fn set_trust_level(&self, user_id: Uuid, level: TrustLevel) -> StoreResult<()>;
    async fn set_email_verified(&self, user_id: Uuid) -> StoreResult<()>;
    async fn set_two_factor_enabled(&self, user_id: Uuid, enabled: bool) -> StoreResult<()>;
    async fn set_lock(
        &self,
        user_id: Uuid,
        locked: bool,
        reason: Option<&str>,
    ) -> StoreResult<()>;
    async fn set_shadow_banned(&self, user_id: Uuid) -> StoreResult<()>;
    /// Hard ban, written by moderation tooling outside this crate.
    async fn set_banned(&self, user_id: Uuid, banned: bool) -> StoreResult<()>;
    async fn set_primary_fingerprint(&self, user_id: Uuid, fingerprint: &str) -> StoreResult<()>;
    /// Blank identity fields but keep the tombstone row for referential
    /// integrity of historical content.
    async fn anonymize_user(&self, user_id: Uuid) -> StoreResult<()>;

    async fn insert_session(&self, row: SessionRow) -> StoreResult<()>;
    async fn find_session(&self, id: Uuid) -> StoreResult<Option<SessionRow>>;
    /// Returns true if a row was deleted.
    async fn delete_session(&self, id: Uuid) -> StoreResult<bool>;
    /// Bulk delete, linearizable with respect to concurrent inserts for the
    /// same user. Returns the number of deleted rows.
    async fn delete_sessions_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
    ) -> StoreResult<u64>;
    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<SessionRow>>;

    async fn two_factor_for_user(&self, user_id: Uuid) -> StoreResult<Option<TwoFactorRow>>;
    async fn upsert_two_factor(&self, user_id: Uuid, row: TwoFactorRow) -> StoreResult<()>;
    /// Atomically consume one backup code; returns false if it was already
    /// used (or never existed).
    async fn remove_backup_code(&self, user_id: Uuid, code_hash: &str) -> StoreResult<bool>;
    async fn delete_two_factor(&self, user_id: Uuid) -> StoreResult<()>;

    /// Evasion correlation inputs: prior banned identities.
    async fn banned_fingerprint_exists(&self, fingerprint_hash: &str) -> StoreResult<bool>;
    /// `ip_prefix` includes its trailing separator, e.g. `203.0.113.`.
    async fn banned_ip_prefix_exists(&self, ip_prefix: &str) -> StoreResult<bool>;
    /// Emails of banned identities, bounded; callers canonicalize.
    async fn banned_emails(&self) -> StoreResult<Vec<String>>;
}

/// Fast counter/TTL store for lockout counters and single-use tokens.
#[async_trait]
pub trait VolatileStore: Send + Sync {
    /// Atomic increment-with-TTL. A fresh or expired key restarts at 1 with
    /// the given window; an unexpired key keeps its deadline. Returns the
    /// post-increment count.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64>;
    /// Current unexpired count, 0 if absent.
    async fn current(&self, key: &str) -> StoreResult<u64>;
    /// Unexpired deadline for a key, if any.
    async fn expiry(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>>;
    /// Push a key's deadline out, e.g. to start a lockout period.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()>;
    async fn clear(&self, key: &str) -> StoreResult<()>;

    /// Store a single-use token reference with TTL.
    async fn put_token(&self, token_hash: &str, user_id: Uuid, ttl: Duration) -> StoreResult<()>;
    /// Atomically consume a token: at most one caller ever receives the
    /// user id, regardless of concurrency.
    async fn take_token(&self, token_hash: &str) -> StoreResult<Option<Uuid>>;
}
