//! Postgres store adapter.
//!
//! Raw SQL through `sqlx`, every query wrapped in a `db.query` span. The
//! atomicity requirements (counter increment, single-use token take, bulk
//! session delete) are pushed into single statements so they hold across
//! service instances.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    CredentialStore, NewUser, SessionRow, StoreError, StoreResult, TwoFactorRow, UserRecord,
    VolatileStore,
};
use crate::trust::TrustLevel;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn map_user(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        oauth_subject: row.get("oauth_subject"),
        trust_level: TrustLevel::from_i16(row.get("trust_level")),
        email_verified: row.get("email_verified"),
        two_factor_enabled: row.get("two_factor_enabled"),
        is_locked: row.get("is_locked"),
        lock_reason: row.get("lock_reason"),
        is_banned: row.get("is_banned"),
        is_shadow_banned: row.get("is_shadow_banned"),
        device_fingerprint: row.get("device_fingerprint"),
        created_at: row.get("created_at"),
    }
}

fn map_session(row: &sqlx::postgres::PgRow) -> SessionRow {
    SessionRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        device_type: row.get("device_type"),
        device_name: row.get("device_name"),
        ip_address: row.get("ip_address"),
        fingerprint_hash: row.get("fingerprint_hash"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, oauth_subject, trust_level, \
     email_verified, two_factor_enabled, is_locked, lock_reason, is_banned, \
     is_shadow_banned, device_fingerprint, created_at";

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn insert_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let query = format!(
            "INSERT INTO users \
                 (email, password_hash, oauth_subject, trust_level, email_verified, device_fingerprint) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        );
        let span = query_span("INSERT", "INSERT INTO users");
        let row = sqlx::query(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.oauth_subject)
            .bind(user.trust_level.as_i16())
            .bind(user.email_verified)
            .bind(&user.device_fingerprint)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(map_user(&row)),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate),
            Err(err) => Err(StoreError::Unavailable(
                anyhow::Error::new(err).context("failed to insert user"),
            )),
        }
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = query_span("SELECT", "SELECT FROM users WHERE id");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;
        Ok(row.as_ref().map(map_user))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let span = query_span("SELECT", "SELECT FROM users WHERE email");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(map_user))
    }

    async fn set_trust_level(&self, user_id: Uuid, level: TrustLevel) -> StoreResult<()> {
        let query = "UPDATE users SET trust_level = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(level.as_i16())
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update trust level")?;
        Ok(())
    }

    async fn set_email_verified(&self, user_id: Uuid) -> StoreResult<()> {
        let query = "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }

    async fn set_two_factor_enabled(&self, user_id: Uuid, enabled: bool) -> StoreResult<()> {
        let query = "UPDATE users SET two_factor_enabled = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(enabled)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update two-factor flag")?;
        Ok(())
    }

    async fn set_lock(&self, user_id: Uuid, locked: bool, reason: Option<&str>) -> StoreResult<()> {
        let query =
            "UPDATE users SET is_locked = $2, lock_reason = $3, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(locked)
            .bind(if locked { reason } else { None })
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update lock state")?;
        Ok(())
    }

    async fn set_shadow_banned(&self, user_id: Uuid) -> StoreResult<()> {
        let query = "UPDATE users SET is_shadow_banned = TRUE, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to shadow-ban user")?;
        Ok(())
    }

    async fn set_banned(&self, user_id: Uuid, banned: bool) -> StoreResult<()> {
        let query = "UPDATE users SET is_banned = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(banned)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update ban state")?;
        Ok(())
    }

    async fn set_primary_fingerprint(&self, user_id: Uuid, fingerprint: &str) -> StoreResult<()> {
        let query = "UPDATE users SET device_fingerprint = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(fingerprint)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update primary fingerprint")?;
        Ok(())
    }

    async fn anonymize_user(&self, user_id: Uuid) -> StoreResult<()> {
        // Tombstone in one transaction: the row survives, identity fields don't.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin anonymize transaction")?;

        let query = r"
            UPDATE users
            SET email = 'deleted-' || id || '@invalid.local',
                password_hash = NULL,
                oauth_subject = NULL,
                device_fingerprint = NULL,
                is_locked = TRUE,
                lock_reason = 'deleted',
                updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", "UPDATE users SET deleted"))
            .await
            .context("failed to anonymize user")?;

        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", "DELETE FROM sessions"))
            .await
            .context("failed to delete sessions for anonymized user")?;

        sqlx::query("DELETE FROM two_factor_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", "DELETE FROM two_factor_credentials"))
            .await
            .context("failed to delete two-factor credential")?;

        tx.commit()
            .await
            .context("failed to commit anonymize transaction")?;
        Ok(())
    }

    async fn insert_session(&self, row: SessionRow) -> StoreResult<()> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, device_type, device_name, ip_address, fingerprint_hash,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(row.id)
            .bind(row.user_id)
            .bind(&row.device_type)
            .bind(&row.device_name)
            .bind(&row.ip_address)
            .bind(&row.fingerprint_hash)
            .bind(row.created_at)
            .bind(row.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", "INSERT INTO sessions"))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<SessionRow>> {
        let query = "SELECT id, user_id, device_type, device_name, ip_address, \
             fingerprint_hash, created_at, expires_at FROM sessions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", "SELECT FROM sessions WHERE id"))
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(map_session))
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<bool> {
        let query = "DELETE FROM sessions WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_sessions_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
    ) -> StoreResult<u64> {
        // One statement, so concurrent issues either commit before the sweep
        // (and are deleted) or after it (and survive). Nothing in between.
        let query = "DELETE FROM sessions WHERE user_id = $1 AND ($2::uuid IS NULL OR id <> $2)";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(except)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete sessions for user")?;
        Ok(result.rows_affected())
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<SessionRow>> {
        let query = "SELECT id, user_id, device_type, device_name, ip_address, \
             fingerprint_hash, created_at, expires_at \
             FROM sessions WHERE user_id = $1 ORDER BY created_at";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", "SELECT FROM sessions WHERE user_id"))
            .await
            .context("failed to list sessions")?;
        Ok(rows.iter().map(map_session).collect())
    }

    async fn two_factor_for_user(&self, user_id: Uuid) -> StoreResult<Option<TwoFactorRow>> {
        let query = "SELECT secret, enabled FROM two_factor_credentials WHERE user_id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", "SELECT FROM two_factor_credentials"))
            .await
            .context("failed to lookup two-factor credential")?;
        let Some(row) = row else {
            return Ok(None);
        };

        let hashes_query =
            "SELECT code_hash FROM two_factor_backup_codes WHERE user_id = $1";
        let hashes = sqlx::query(hashes_query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", "SELECT FROM two_factor_backup_codes"))
            .await
            .context("failed to list backup codes")?;

        Ok(Some(TwoFactorRow {
            secret: row.get("secret"),
            backup_code_hashes: hashes.iter().map(|row| row.get("code_hash")).collect(),
            enabled: row.get("enabled"),
        }))
    }

    async fn upsert_two_factor(&self, user_id: Uuid, row: TwoFactorRow) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin two-factor transaction")?;

        let query = r"
            INSERT INTO two_factor_credentials (user_id, secret, enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET secret = $2, enabled = $3
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(&row.secret)
            .bind(row.enabled)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", "UPSERT two_factor_credentials"))
            .await
            .context("failed to upsert two-factor credential")?;

        sqlx::query("DELETE FROM two_factor_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", "DELETE FROM two_factor_backup_codes"))
            .await
            .context("failed to clear backup codes")?;

        for code_hash in &row.backup_code_hashes {
            sqlx::query("INSERT INTO two_factor_backup_codes (user_id, code_hash) VALUES ($1, $2)")
                .bind(user_id)
                .bind(code_hash)
                .execute(&mut *tx)
                .instrument(query_span("INSERT", "INSERT INTO two_factor_backup_codes"))
                .await
                .context("failed to insert backup code")?;
        }

        tx.commit()
            .await
            .context("failed to commit two-factor transaction")?;
        Ok(())
    }

    async fn remove_backup_code(&self, user_id: Uuid, code_hash: &str) -> StoreResult<bool> {
        // Single DELETE: two concurrent redemptions of the same code cannot
        // both see a deleted row.
        let query =
            "DELETE FROM two_factor_backup_codes WHERE user_id = $1 AND code_hash = $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(code_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to consume backup code")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_two_factor(&self, user_id: Uuid) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin two-factor delete")?;
        sqlx::query("DELETE FROM two_factor_backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", "DELETE FROM two_factor_backup_codes"))
            .await
            .context("failed to delete backup codes")?;
        sqlx::query("DELETE FROM two_factor_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", "DELETE FROM two_factor_credentials"))
            .await
            .context("failed to delete two-factor credential")?;
        tx.commit()
            .await
            .context("failed to commit two-factor delete")?;
        Ok(())
    }

    async fn banned_fingerprint_exists(&self, fingerprint_hash: &str) -> StoreResult<bool> {
        let query =
            "SELECT 1 FROM users WHERE is_banned AND device_fingerprint = $1 LIMIT 1";
        let row = sqlx::query(query)
            .bind(fingerprint_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check banned fingerprints")?;
        Ok(row.is_some())
    }

    async fn banned_ip_prefix_exists(&self, ip_prefix: &str) -> StoreResult<bool> {
        let query = r"
            SELECT 1
            FROM sessions
            JOIN users ON users.id = sessions.user_id
            WHERE users.is_banned
              AND sessions.ip_address LIKE $1 || '%'
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(ip_prefix)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", "SELECT banned sessions by ip prefix"))
            .await
            .context("failed to check banned ip prefixes")?;
        Ok(row.is_some())
    }

    async fn banned_emails(&self) -> StoreResult<Vec<String>> {
        let query = "SELECT email FROM users WHERE is_banned LIMIT 500";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list banned emails")?;
        Ok(rows.iter().map(|row| row.get("email")).collect())
    }
}

#[async_trait]
impl VolatileStore for PostgresStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        // Piggyback expired-row cleanup on the write path so the table
        // stays bounded without a reaper job.
        sqlx::query("DELETE FROM auth_counters WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .instrument(query_span("DELETE", "DELETE expired auth_counters"))
            .await
            .context("failed to purge expired counters")?;

        // Upsert with CASE arms: expired rows restart at 1, live rows keep
        // their deadline. Single statement, so parallel failures both count.
        let query = r"
            INSERT INTO auth_counters (counter_key, count, expires_at)
            VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 second'))
            ON CONFLICT (counter_key) DO UPDATE SET
                count = CASE
                    WHEN auth_counters.expires_at <= NOW() THEN 1
                    ELSE auth_counters.count + 1
                END,
                expires_at = CASE
                    WHEN auth_counters.expires_at <= NOW()
                        THEN NOW() + ($2 * INTERVAL '1 second')
                    ELSE auth_counters.expires_at
                END
            RETURNING count
        ";
        let row = sqlx::query(query)
            .bind(key)
            .bind(window.as_secs() as i64)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", "UPSERT auth_counters"))
            .await
            .context("failed to increment counter")?;
        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }

    async fn current(&self, key: &str) -> StoreResult<u64> {
        let query =
            "SELECT count FROM auth_counters WHERE counter_key = $1 AND expires_at > NOW()";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to read counter")?;
        Ok(row.map_or(0, |row| {
            let count: i64 = row.get("count");
            count.max(0) as u64
        }))
    }

    async fn expiry(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let query =
            "SELECT expires_at FROM auth_counters WHERE counter_key = $1 AND expires_at > NOW()";
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to read counter expiry")?;
        Ok(row.map(|row| row.get("expires_at")))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let query = "UPDATE auth_counters \
             SET expires_at = NOW() + ($2 * INTERVAL '1 second') WHERE counter_key = $1";
        sqlx::query(query)
            .bind(key)
            .bind(ttl.as_secs() as i64)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", "UPDATE auth_counters expiry"))
            .await
            .context("failed to set counter expiry")?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> StoreResult<()> {
        let query = "DELETE FROM auth_counters WHERE counter_key = $1";
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to clear counter")?;
        Ok(())
    }

    async fn put_token(&self, token_hash: &str, user_id: Uuid, ttl: Duration) -> StoreResult<()> {
        // Abandoned challenges expire silently; sweep them here so they
        // never pile up.
        sqlx::query("DELETE FROM one_time_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .instrument(query_span("DELETE", "DELETE expired one_time_tokens"))
            .await
            .context("failed to purge expired tokens")?;

        let query = r"
            INSERT INTO one_time_tokens (token_hash, user_id, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(ttl.as_secs() as i64)
            .execute(&self.pool)
            .instrument(query_span("INSERT", "INSERT INTO one_time_tokens"))
            .await
            .context("failed to store one-time token")?;
        Ok(())
    }

    async fn take_token(&self, token_hash: &str) -> StoreResult<Option<Uuid>> {
        // DELETE ... RETURNING is the whole replay defense: exactly one
        // caller gets the row back.
        let query = r"
            DELETE FROM one_time_tokens
            WHERE token_hash = $1 AND expires_at > NOW()
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("DELETE", "DELETE FROM one_time_tokens"))
            .await
            .context("failed to consume one-time token")?;
        Ok(row.map(|row| row.get("user_id")))
    }
}
