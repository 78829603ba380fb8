//! The security core: one struct wiring every component together.
//!
//! [`AuthCore`] owns the request-path orchestration — signup, login, 2FA
//! completion, panic lockdown — and dispatches every best-effort side
//! effect (evasion scoring, new-device notification, trust re-evaluation)
//! onto the background task queue so the response never waits on them.

pub mod config;
pub mod error;
pub mod password;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::device::evasion::EvasionDetector;
use crate::device::{fingerprint, ip_block, DeviceDetector};
use crate::lockdown::LockdownController;
use crate::lockout::LockoutGuard;
use crate::notify::{LogNotifier, Notifier, SecurityEvent};
use crate::session::token::TokenSigner;
use crate::session::{mask_ip, DeviceInfo, IssuedSession, SessionManager};
use crate::store::{CredentialStore, NewUser, UserRecord, VolatileStore};
use crate::tasks::TaskQueue;
use crate::trust::{TrustEngine, TrustLevel};
use crate::twofactor::TwoFactorEngine;
use config::SecurityConfig;
use error::{AuthError, AuthResult};
use password::{hash_password, verify_password};

const TASK_QUEUE_CAPACITY: usize = 256;
const TASK_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_PASSWORD_LENGTH: usize = 8;

/// User row shaped for API responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub trust_level: TrustLevel,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
}

impl From<&UserRecord> for UserView {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            trust_level: user.trust_level,
            email_verified: user.email_verified,
            two_factor_enabled: user.two_factor_enabled,
        }
    }
}

/// Successful authentication: the user plus a live session token.
#[derive(Debug)]
pub struct AuthOutcome {
    pub user: UserView,
    pub session: IssuedSession,
}

/// Login either completes immediately or pauses at the 2FA gate.
#[derive(Debug)]
pub enum LoginOutcome {
    Complete(AuthOutcome),
    TwoFactorRequired { challenge_token: String },
}

/// Identity already verified by an external provider. The provider
/// round-trip happens outside the core; this is its trusted result.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub email: String,
    pub subject_id: String,
    pub display_name: Option<String>,
    pub picture: Option<String>,
}

pub struct AuthCore {
    store: Arc<dyn CredentialStore>,
    config: SecurityConfig,
    sessions: Arc<SessionManager>,
    lockout: LockoutGuard,
    two_factor: TwoFactorEngine,
    devices: DeviceDetector,
    evasion: Arc<EvasionDetector>,
    trust: TrustEngine,
    lockdown: LockdownController,
    notifier: Arc<dyn Notifier>,
    tasks: TaskQueue,
}

impl AuthCore {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        volatile: Arc<dyn VolatileStore>,
        config: SecurityConfig,
    ) -> Self {
        Self::with_notifier(store, volatile, config, Arc::new(LogNotifier))
    }

    #[must_use]
    pub fn with_notifier(
        store: Arc<dyn CredentialStore>,
        volatile: Arc<dyn VolatileStore>,
        config: SecurityConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let signer = TokenSigner::new(config.token_secret());
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            signer,
            config.session_ttl_seconds(),
            config.remember_me_ttl_seconds(),
        ));
        let lockout = LockoutGuard::new(
            volatile.clone(),
            config.lockout_threshold(),
            config.lockout_window_seconds(),
            config.lockout_duration_seconds(),
        );
        let two_factor = TwoFactorEngine::new(
            store.clone(),
            volatile,
            config.backup_code_pepper().clone(),
            config.totp_issuer().to_string(),
            config.challenge_ttl_seconds(),
        );
        let devices = DeviceDetector::new(store.clone());
        let evasion = Arc::new(EvasionDetector::new(
            store.clone(),
            config.evasion_low_threshold(),
            config.evasion_high_threshold(),
        ));
        let trust = TrustEngine::new(config.established_age_days(), config.elevated_age_days());
        let lockdown = LockdownController::new(store.clone(), sessions.clone());
        let tasks = TaskQueue::start(TASK_QUEUE_CAPACITY, TASK_TIMEOUT);
        Self {
            store,
            config,
            sessions,
            lockout,
            two_factor,
            devices,
            evasion,
            trust,
            lockdown,
            notifier,
            tasks,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn two_factor(&self) -> &TwoFactorEngine {
        &self.two_factor
    }

    #[must_use]
    pub fn lockdown(&self) -> &LockdownController {
        &self.lockdown
    }

    #[must_use]
    pub fn evasion(&self) -> &EvasionDetector {
        &self.evasion
    }

    /// Liveness probe for the critical dependency, used by `/health`. A nil
    /// lookup exercises the store round-trip without touching real rows.
    pub async fn store_healthy(&self) -> bool {
        self.store.find_user(Uuid::nil()).await.is_ok()
    }

    /// Current view of a user row.
    pub async fn user(&self, user_id: Uuid) -> AuthResult<UserView> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(AuthError::Authentication)?;
        Ok(UserView::from(&user))
    }

    /// Register a new account and sign it in. An enrollment code matching
    /// the configured set takes the audited privileged branch: the account
    /// is created at the elevated trust level with its email pre-verified.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        device: &DeviceInfo,
        enrollment_code: Option<&str>,
        remember_me: bool,
    ) -> AuthResult<AuthOutcome> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        // Signup is unauthenticated, so the abuse counter keys on the
        // client address rather than the identity.
        let ip_identity = format!("ip:{}", device.ip_address);
        let status = self.lockout.is_locked_out(&ip_identity).await?;
        if status.locked {
            return Err(AuthError::RateLimited {
                retry_after_seconds: status.retry_after_seconds(),
            });
        }
        self.lockout.record_failure(&ip_identity).await?;

        let privileged = match enrollment_code {
            Some(code) => {
                if !self.config.enrollment_codes().iter().any(|c| c == code) {
                    return Err(AuthError::Validation(
                        "invalid enrollment code".to_string(),
                    ));
                }
                true
            }
            None => false,
        };

        let fingerprint_hash = fingerprint(device);
        let user = self
            .store
            .insert_user(NewUser {
                email: email.clone(),
                password_hash: Some(hash_password(password)?),
                oauth_subject: None,
                trust_level: if privileged {
                    TrustLevel::Elevated
                } else {
                    TrustLevel::Unverified
                },
                email_verified: privileged,
                device_fingerprint: Some(fingerprint_hash.clone()),
            })
            .await?;
        if privileged {
            // Audit trail for the bypass branch.
            info!(user_id = %user.id, "privileged enrollment: account created at elevated trust");
        }

        let session = self
            .sessions
            .issue(user.id, device, &fingerprint_hash, remember_me)
            .await?;
        self.dispatch_evasion_check(&user, device, &fingerprint_hash);
        Ok(AuthOutcome {
            user: UserView::from(&user),
            session,
        })
    }

    /// Password login. Runs the lockout gate before touching the password
    /// hash; pauses at a challenge token when 2FA is enabled.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: &DeviceInfo,
        remember_me: bool,
    ) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email)?;

        let status = self.lockout.is_locked_out(&email).await?;
        if status.locked {
            return Err(AuthError::RateLimited {
                retry_after_seconds: status.retry_after_seconds(),
            });
        }

        let user = self.store.find_user_by_email(&email).await?;
        let verified = match &user {
            Some(user) => user
                .password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash)),
            // Hash anyway so a missing account costs the same time as a
            // wrong password.
            None => {
                let _ = hash_password(password);
                false
            }
        };
        if !verified {
            let status = self.lockout.record_failure(&email).await?;
            if status.locked {
                return Err(AuthError::RateLimited {
                    retry_after_seconds: status.retry_after_seconds(),
                });
            }
            return Err(AuthError::Authentication);
        }
        let user = user.ok_or(AuthError::Authentication)?;
        if user.is_locked {
            return Err(AuthError::AccountLocked);
        }
        self.lockout.clear(&email).await?;

        if user.two_factor_enabled {
            let challenge_token = self.two_factor.create_challenge(user.id).await?;
            return Ok(LoginOutcome::TwoFactorRequired { challenge_token });
        }
        let outcome = self.finalize_login(user, device, remember_me).await?;
        Ok(LoginOutcome::Complete(outcome))
    }

    /// Complete a 2FA login challenge.
    pub async fn complete_two_factor(
        &self,
        challenge_token: &str,
        code: &str,
        device: &DeviceInfo,
        remember_me: bool,
    ) -> AuthResult<AuthOutcome> {
        let user_id = self.two_factor.verify_challenge(challenge_token, code).await?;
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(AuthError::Authentication)?;
        if user.is_locked {
            return Err(AuthError::AccountLocked);
        }
        self.finalize_login(user, device, remember_me).await
    }

    /// Sign in (or up) with an identity an external provider has already
    /// verified. First sight of an email creates the account with a
    /// verified address and no password.
    pub async fn oauth_login(
        &self,
        identity: &VerifiedIdentity,
        device: &DeviceInfo,
        remember_me: bool,
    ) -> AuthResult<AuthOutcome> {
        let email = normalize_email(&identity.email)?;
        let fingerprint_hash = fingerprint(device);
        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                let user = self
                    .store
                    .insert_user(NewUser {
                        email,
                        password_hash: None,
                        oauth_subject: Some(identity.subject_id.clone()),
                        trust_level: TrustLevel::EmailVerified,
                        email_verified: true,
                        device_fingerprint: Some(fingerprint_hash.clone()),
                    })
                    .await?;
                self.dispatch_evasion_check(&user, device, &fingerprint_hash);
                user
            }
        };
        if user.is_locked {
            return Err(AuthError::AccountLocked);
        }
        self.finalize_login(user, device, remember_me).await
    }

    /// Email verification callback: flip the flag and re-evaluate trust.
    pub async fn mark_email_verified(&self, user_id: Uuid) -> AuthResult<UserView> {
        self.store.set_email_verified(user_id).await?;
        let mut user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(AuthError::Authentication)?;
        if let Some(level) = self.trust.evaluate_promotion(&user, Utc::now()) {
            self.store.set_trust_level(user_id, level).await?;
            user.trust_level = level;
        }
        Ok(UserView::from(&user))
    }

    /// Anonymizing account deletion. The row survives as a tombstone so
    /// historical references keep resolving; sessions and 2FA credentials
    /// are destroyed. Password accounts must confirm the password;
    /// provider-verified accounts have no second factor to present here,
    /// so the authenticated session stands alone.
    pub async fn delete_account(&self, user_id: Uuid, password: &str) -> AuthResult<()> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(AuthError::Authentication)?;
        if let Some(hash) = user.password_hash.as_deref() {
            if !verify_password(password, hash) {
                return Err(AuthError::Authentication);
            }
        }
        self.store.anonymize_user(user_id).await?;
        info!(user_id = %user_id, "account anonymized");
        Ok(())
    }

    /// Panic lockdown for the authenticated caller.
    pub async fn panic(&self, user_id: Uuid) -> AuthResult<()> {
        let revoked = self.lockdown.panic(user_id).await?;
        let notifier = self.notifier.clone();
        self.tasks.dispatch("panic-notification", async move {
            notifier
                .notify(SecurityEvent::PanicLockdown {
                    user_id,
                    revoked_sessions: revoked,
                })
                .await
        });
        Ok(())
    }

    /// Issue the session and queue every post-login side effect.
    async fn finalize_login(
        &self,
        user: UserRecord,
        device: &DeviceInfo,
        remember_me: bool,
    ) -> AuthResult<AuthOutcome> {
        let fingerprint_hash = fingerprint(device);
        let session = self
            .sessions
            .issue(user.id, device, &fingerprint_hash, remember_me)
            .await?;

        self.dispatch_new_device_check(&user, device, &fingerprint_hash, session.session_id);
        self.dispatch_evasion_check(&user, device, &fingerprint_hash);
        self.dispatch_trust_evaluation(&user);

        Ok(AuthOutcome {
            user: UserView::from(&user),
            session,
        })
    }

    fn dispatch_new_device_check(
        &self,
        user: &UserRecord,
        device: &DeviceInfo,
        fingerprint_hash: &str,
        session_id: Uuid,
    ) {
        let detector = self.devices.clone();
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let user_id = user.id;
        let known_primary = user.device_fingerprint.clone();
        let fingerprint_hash = fingerprint_hash.to_string();
        let device = device.clone();
        self.tasks.dispatch("new-device-check", async move {
            let first_seen = detector
                .is_first_seen(user_id, &fingerprint_hash, session_id)
                .await?;
            if known_primary.is_none() {
                store
                    .set_primary_fingerprint(user_id, &fingerprint_hash)
                    .await?;
            }
            if first_seen && known_primary.as_deref() != Some(fingerprint_hash.as_str()) {
                notifier
                    .notify(SecurityEvent::NewDevice {
                        user_id,
                        device_name: device.device_name,
                        device_type: device.device_type,
                        masked_ip: mask_ip(&device.ip_address),
                        at: Utc::now(),
                    })
                    .await?;
            }
            Ok(())
        });
    }

    fn dispatch_evasion_check(&self, user: &UserRecord, device: &DeviceInfo, fingerprint_hash: &str) {
        let evasion = self.evasion.clone();
        let notifier = self.notifier.clone();
        let user_id = user.id;
        let email = user.email.clone();
        let fingerprint_hash = fingerprint_hash.to_string();
        let block = ip_block(&device.ip_address);
        self.tasks.dispatch("evasion-check", async move {
            let verdict = evasion
                .assess(user_id, &fingerprint_hash, &block, &email)
                .await?;
            if verdict.detected {
                notifier
                    .notify(SecurityEvent::EvasionAlert {
                        user_id,
                        confidence: verdict.confidence,
                        shadow_banned: verdict.should_shadow_ban,
                    })
                    .await?;
            }
            Ok(())
        });
    }

    fn dispatch_trust_evaluation(&self, user: &UserRecord) {
        let store = self.store.clone();
        let trust = self.trust;
        let user = user.clone();
        self.tasks.dispatch("trust-evaluation", async move {
            if let Some(level) = trust.evaluate_promotion(&user, Utc::now()) {
                info!(user_id = %user.id, %level, "trust promotion");
                store.set_trust_level(user.id, level).await?;
            }
            Ok(())
        });
    }
}

impl std::fmt::Debug for AuthCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Lowercase and shape-check. Normalization happens before every lookup so
/// the same mailbox never lands in two rows.
pub fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
    });
    if !valid || email.len() > 254 {
        return Err(AuthError::Validation("invalid email address".to_string()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
