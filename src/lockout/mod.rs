//! Failed-login tracking and temporary lockout.
//!
//! Counters live in the volatile store keyed by normalized identity (email,
//! or IP for unauthenticated probing). The read path (`is_locked_out`) runs
//! before any password comparison so a locked identity never costs a hash
//! verification.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::AuthResult;
use crate::store::VolatileStore;

#[derive(Debug, Clone, Copy)]
pub struct LockoutStatus {
    pub locked: bool,
    pub lockout_ends: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    #[must_use]
    pub fn retry_after_seconds(&self) -> i64 {
        self.lockout_ends
            .map(|ends| (ends - Utc::now()).num_seconds().max(0))
            .unwrap_or(0)
    }
}

pub struct LockoutGuard {
    store: Arc<dyn VolatileStore>,
    threshold: u64,
    window: Duration,
    lockout: Duration,
}

impl LockoutGuard {
    #[must_use]
    pub fn new(
        store: Arc<dyn VolatileStore>,
        threshold: u64,
        window_seconds: i64,
        lockout_seconds: i64,
    ) -> Self {
        Self {
            store,
            threshold,
            window: Duration::from_secs(window_seconds.max(1) as u64),
            lockout: Duration::from_secs(lockout_seconds.max(1) as u64),
        }
    }

    fn key(identity: &str) -> String {
        format!("failed-login:{identity}")
    }

    /// Pure read used before password comparison.
    pub async fn is_locked_out(&self, identity: &str) -> AuthResult<LockoutStatus> {
        let key = Self::key(identity);
        let count = self.store.current(&key).await?;
        if count < self.threshold {
            return Ok(LockoutStatus {
                locked: false,
                lockout_ends: None,
            });
        }
        let ends = self.store.expiry(&key).await?;
        Ok(LockoutStatus {
            locked: true,
            lockout_ends: ends,
        })
    }

    /// Record one failed attempt. The increment is atomic in the store, so
    /// two parallel failures both count. Crossing the threshold extends the
    /// key's TTL to the lockout duration.
    pub async fn record_failure(&self, identity: &str) -> AuthResult<LockoutStatus> {
        let key = Self::key(identity);
        let count = self.store.increment(&key, self.window).await?;
        if count == self.threshold {
            self.store.set_expiry(&key, self.lockout).await?;
        }
        if count < self.threshold {
            return Ok(LockoutStatus {
                locked: false,
                lockout_ends: None,
            });
        }
        let ends = self.store.expiry(&key).await?;
        Ok(LockoutStatus {
            locked: true,
            lockout_ends: ends,
        })
    }

    /// Reset on successful authentication.
    pub async fn clear(&self, identity: &str) -> AuthResult<()> {
        self.store.clear(&Self::key(identity)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for LockoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutGuard")
            .field("threshold", &self.threshold)
            .field("window", &self.window)
            .field("lockout", &self.lockout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::LockoutGuard;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn guard() -> LockoutGuard {
        LockoutGuard::new(Arc::new(MemoryStore::new()), 3, 60, 900)
    }

    #[tokio::test]
    async fn locks_at_threshold() {
        let guard = guard();
        assert!(!guard.record_failure("a@example.com").await.unwrap().locked);
        assert!(!guard.record_failure("a@example.com").await.unwrap().locked);
        let status = guard.record_failure("a@example.com").await.unwrap();
        assert!(status.locked);
        assert!(status.lockout_ends.is_some());
        // Attempts past the threshold stay locked.
        assert!(guard.record_failure("a@example.com").await.unwrap().locked);
    }

    #[tokio::test]
    async fn read_path_reports_lock() {
        let guard = guard();
        for _ in 0..3 {
            guard.record_failure("b@example.com").await.unwrap();
        }
        let status = guard.is_locked_out("b@example.com").await.unwrap();
        assert!(status.locked);
        assert!(status.retry_after_seconds() > 0);
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let guard = guard();
        for _ in 0..3 {
            guard.record_failure("c@example.com").await.unwrap();
        }
        guard.clear("c@example.com").await.unwrap();
        let status = guard.is_locked_out("c@example.com").await.unwrap();
        assert!(!status.locked);
        // Counter restarts from zero after a successful login.
        assert!(!guard.record_failure("c@example.com").await.unwrap().locked);
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let guard = guard();
        for _ in 0..3 {
            guard.record_failure("locked@example.com").await.unwrap();
        }
        assert!(
            !guard
                .is_locked_out("other@example.com")
                .await
                .unwrap()
                .locked
        );
    }
}
