//! In-memory store adapter.
//!
//! Backs tests and DSN-less local runs. Counter increments and token
//! consumption hold a single mutex, which gives the same atomicity the
//! Postgres adapter gets from single-statement upserts.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    CredentialStore, NewUser, SessionRow, StoreError, StoreResult, TwoFactorRow, UserRecord,
    VolatileStore,
};

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
    sessions: RwLock<HashMap<Uuid, SessionRow>>,
    two_factor: RwLock<HashMap<Uuid, TwoFactorRow>>,
    counters: Mutex<HashMap<String, CounterEntry>>,
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn ttl_deadline(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::Duplicate);
        }
        let record = UserRecord {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            oauth_subject: user.oauth_subject,
            trust_level: user.trust_level,
            email_verified: user.email_verified,
            two_factor_enabled: false,
            is_locked: false,
            lock_reason: None,
            is_banned: false,
            is_shadow_banned: false,
            device_fingerprint: user.device_fingerprint,
            created_at: Utc::now(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn set_trust_level(
        &self,
        user_id: Uuid,
        level: crate::trust::TrustLevel,
    ) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.trust_level = level;
        }
        Ok(())
    }

    async fn set_email_verified(&self, user_id: Uuid) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.email_verified = true;
        }
        Ok(())
    }

    async fn set_two_factor_enabled(&self, user_id: Uuid, enabled: bool) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.two_factor_enabled = enabled;
        }
        Ok(())
    }

    async fn set_lock(&self, user_id: Uuid, locked: bool, reason: Option<&str>) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.is_locked = locked;
            user.lock_reason = if locked { reason.map(str::to_string) } else { None };
        }
        Ok(())
    }

    async fn set_shadow_banned(&self, user_id: Uuid) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.is_shadow_banned = true;
        }
        Ok(())
    }

    async fn set_banned(&self, user_id: Uuid, banned: bool) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.is_banned = banned;
        }
        Ok(())
    }

    async fn set_primary_fingerprint(&self, user_id: Uuid, fingerprint: &str) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.device_fingerprint = Some(fingerprint.to_string());
        }
        Ok(())
    }

    async fn anonymize_user(&self, user_id: Uuid) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.email = format!("deleted-{user_id}@invalid.local");
            user.password_hash = None;
            user.oauth_subject = None;
            user.device_fingerprint = None;
            user.is_locked = true;
            user.lock_reason = Some("deleted".to_string());
        }
        self.sessions
            .write()
            .await
            .retain(|_, session| session.user_id != user_id);
        self.two_factor.write().await.remove(&user_id);
        Ok(())
    }

    async fn insert_session(&self, row: SessionRow) -> StoreResult<()> {
        self.sessions.write().await.insert(row.id, row);
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<SessionRow>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }

    async fn delete_sessions_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
    ) -> StoreResult<u64> {
        // Single write lock: no concurrently-issued session can interleave
        // with the sweep.
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| session.user_id != user_id || Some(*id) == except);
        Ok((before - sessions.len()) as u64)
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<SessionRow>> {
        let mut rows: Vec<SessionRow> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }

    async fn two_factor_for_user(&self, user_id: Uuid) -> StoreResult<Option<TwoFactorRow>> {
        Ok(self.two_factor.read().await.get(&user_id).cloned())
    }

    async fn upsert_two_factor(&self, user_id: Uuid, row: TwoFactorRow) -> StoreResult<()> {
        self.two_factor.write().await.insert(user_id, row);
        Ok(())
    }

    async fn remove_backup_code(&self, user_id: Uuid, code_hash: &str) -> StoreResult<bool> {
        let mut credentials = self.two_factor.write().await;
        let Some(row) = credentials.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = row.backup_code_hashes.len();
        row.backup_code_hashes.retain(|hash| hash != code_hash);
        Ok(row.backup_code_hashes.len() < before)
    }

    async fn delete_two_factor(&self, user_id: Uuid) -> StoreResult<()> {
        self.two_factor.write().await.remove(&user_id);
        Ok(())
    }

    async fn banned_fingerprint_exists(&self, fingerprint_hash: &str) -> StoreResult<bool> {
        Ok(self.users.read().await.values().any(|user| {
            user.is_banned && user.device_fingerprint.as_deref() == Some(fingerprint_hash)
        }))
    }

    async fn banned_ip_prefix_exists(&self, ip_prefix: &str) -> StoreResult<bool> {
        let users = self.users.read().await;
        let banned: Vec<Uuid> = users
            .values()
            .filter(|user| user.is_banned)
            .map(|user| user.id)
            .collect();
        drop(users);
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .any(|session| {
                banned.contains(&session.user_id) && session.ip_address.starts_with(ip_prefix)
            }))
    }

    async fn banned_emails(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.is_banned)
            .map(|user| user.email.clone())
            .collect())
    }
}

#[async_trait]
impl VolatileStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let mut counters = self.counters.lock().await;
        let now = Utc::now();
        // Expired entries are swept on every write, so an expired key
        // restarts at 1 through the insert path below.
        counters.retain(|_, entry| entry.expires_at > now);
        let entry = counters
            .entry(key.to_string())
            .and_modify(|entry| entry.count += 1)
            .or_insert_with(|| CounterEntry {
                count: 1,
                expires_at: ttl_deadline(window),
            });
        Ok(entry.count)
    }

    async fn current(&self, key: &str) -> StoreResult<u64> {
        let counters = self.counters.lock().await;
        Ok(counters
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map_or(0, |entry| entry.count))
    }

    async fn expiry(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let counters = self.counters.lock().await;
        Ok(counters
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.expires_at))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        if let Some(entry) = self.counters.lock().await.get_mut(key) {
            entry.expires_at = ttl_deadline(ttl);
        }
        Ok(())
    }

    async fn clear(&self, key: &str) -> StoreResult<()> {
        self.counters.lock().await.remove(key);
        Ok(())
    }

    async fn put_token(&self, token_hash: &str, user_id: Uuid, ttl: Duration) -> StoreResult<()> {
        let mut tokens = self.tokens.lock().await;
        let now = Utc::now();
        tokens.retain(|_, entry| entry.expires_at > now);
        tokens.insert(
            token_hash.to_string(),
            TokenEntry {
                user_id,
                expires_at: ttl_deadline(ttl),
            },
        );
        Ok(())
    }

    async fn take_token(&self, token_hash: &str) -> StoreResult<Option<Uuid>> {
        // Remove-then-check under one lock: a token is handed out at most once.
        let mut tokens = self.tokens.lock().await;
        Ok(tokens
            .remove(token_hash)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.user_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::MemoryStore;
    use crate::store::{CredentialStore, NewUser, VolatileStore};
    use crate::trust::TrustLevel;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: Some("hash".to_string()),
            oauth_subject: None,
            trust_level: TrustLevel::Unverified,
            email_verified: false,
            device_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let store = MemoryStore::new();
        store.insert_user(new_user("a@example.com")).await.unwrap();
        let err = store.insert_user(new_user("a@example.com")).await;
        assert!(matches!(err, Err(crate::store::StoreError::Duplicate)));
    }

    #[tokio::test]
    async fn concurrent_increments_all_counted() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("failed:x", Duration::from_secs(60)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.current("failed:x").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn token_consumed_at_most_once() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store
            .put_token("abc", user_id, Duration::from_secs(60))
            .await
            .unwrap();

        let mut winners = 0;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.take_token("abc").await }));
        }
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn expired_token_not_returned() {
        let store = MemoryStore::new();
        store
            .put_token("gone", Uuid::new_v4(), Duration::from_secs(0))
            .await
            .unwrap();
        assert!(store.take_token("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_swept_on_write() {
        let store = MemoryStore::new();
        store
            .put_token("stale", Uuid::new_v4(), Duration::from_secs(0))
            .await
            .unwrap();
        store
            .put_token("live", Uuid::new_v4(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.tokens.lock().await.len(), 1);

        store
            .increment("stale-counter", Duration::from_secs(0))
            .await
            .unwrap();
        store
            .increment("live-counter", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.counters.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn anonymize_keeps_tombstone() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("gone@example.com")).await.unwrap();
        store.anonymize_user(user.id).await.unwrap();
        let tombstone = store.find_user(user.id).await.unwrap().unwrap();
        assert!(tombstone.email.starts_with("deleted-"));
        assert!(tombstone.password_hash.is_none());
        assert!(tombstone.is_locked);
    }
}
