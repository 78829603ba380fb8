//! Security core configuration.
//!
//! All operational tuning parameters (TTLs, lockout and evasion thresholds)
//! live here with sane defaults and builder-style overrides. Secrets are
//! injected by the caller and held behind [`SecretString`]; nothing in this
//! module reads the environment directly.

use secrecy::SecretString;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_REMEMBER_ME_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_LOCKOUT_THRESHOLD: u64 = 5;
const DEFAULT_LOCKOUT_WINDOW_SECONDS: i64 = 15 * 60;
const DEFAULT_LOCKOUT_DURATION_SECONDS: i64 = 15 * 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_EVASION_LOW_THRESHOLD: f64 = 0.4;
const DEFAULT_EVASION_HIGH_THRESHOLD: f64 = 0.8;
const DEFAULT_ESTABLISHED_AGE_DAYS: i64 = 7;
const DEFAULT_ELEVATED_AGE_DAYS: i64 = 30;
const DEFAULT_TOTP_ISSUER: &str = "Vigil";

#[derive(Clone)]
pub struct SecurityConfig {
    token_secret: SecretString,
    backup_code_pepper: SecretString,
    enrollment_codes: Vec<String>,
    totp_issuer: String,
    session_ttl_seconds: i64,
    remember_me_ttl_seconds: i64,
    lockout_threshold: u64,
    lockout_window_seconds: i64,
    lockout_duration_seconds: i64,
    challenge_ttl_seconds: i64,
    evasion_low_threshold: f64,
    evasion_high_threshold: f64,
    established_age_days: i64,
    elevated_age_days: i64,
}

impl SecurityConfig {
    #[must_use]
    pub fn new(token_secret: SecretString, backup_code_pepper: SecretString) -> Self {
        Self {
            token_secret,
            backup_code_pepper,
            enrollment_codes: Vec::new(),
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_me_ttl_seconds: DEFAULT_REMEMBER_ME_TTL_SECONDS,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window_seconds: DEFAULT_LOCKOUT_WINDOW_SECONDS,
            lockout_duration_seconds: DEFAULT_LOCKOUT_DURATION_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            evasion_low_threshold: DEFAULT_EVASION_LOW_THRESHOLD,
            evasion_high_threshold: DEFAULT_EVASION_HIGH_THRESHOLD,
            established_age_days: DEFAULT_ESTABLISHED_AGE_DAYS,
            elevated_age_days: DEFAULT_ELEVATED_AGE_DAYS,
        }
    }

    #[must_use]
    pub fn with_enrollment_codes(mut self, codes: Vec<String>) -> Self {
        self.enrollment_codes = codes;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_me_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_me_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u64) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_window_seconds(mut self, seconds: i64) -> Self {
        self.lockout_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_duration_seconds(mut self, seconds: i64) -> Self {
        self.lockout_duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_evasion_thresholds(mut self, low: f64, high: f64) -> Self {
        self.evasion_low_threshold = low;
        self.evasion_high_threshold = high;
        self
    }

    #[must_use]
    pub fn with_trust_age_days(mut self, established: i64, elevated: i64) -> Self {
        self.established_age_days = established;
        self.elevated_age_days = elevated;
        self
    }

    #[must_use]
    pub fn token_secret(&self) -> &SecretString {
        &self.token_secret
    }

    #[must_use]
    pub fn backup_code_pepper(&self) -> &SecretString {
        &self.backup_code_pepper
    }

    #[must_use]
    pub fn enrollment_codes(&self) -> &[String] {
        &self.enrollment_codes
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn remember_me_ttl_seconds(&self) -> i64 {
        self.remember_me_ttl_seconds
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u64 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_window_seconds(&self) -> i64 {
        self.lockout_window_seconds
    }

    #[must_use]
    pub fn lockout_duration_seconds(&self) -> i64 {
        self.lockout_duration_seconds
    }

    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl_seconds
    }

    #[must_use]
    pub fn evasion_low_threshold(&self) -> f64 {
        self.evasion_low_threshold
    }

    #[must_use]
    pub fn evasion_high_threshold(&self) -> f64 {
        self.evasion_high_threshold
    }

    #[must_use]
    pub fn established_age_days(&self) -> i64 {
        self.established_age_days
    }

    #[must_use]
    pub fn elevated_age_days(&self) -> i64 {
        self.elevated_age_days
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets and enrollment codes are redacted on purpose.
        f.debug_struct("SecurityConfig")
            .field("totp_issuer", &self.totp_issuer)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("remember_me_ttl_seconds", &self.remember_me_ttl_seconds)
            .field("lockout_threshold", &self.lockout_threshold)
            .field("lockout_window_seconds", &self.lockout_window_seconds)
            .field("lockout_duration_seconds", &self.lockout_duration_seconds)
            .field("challenge_ttl_seconds", &self.challenge_ttl_seconds)
            .field("evasion_low_threshold", &self.evasion_low_threshold)
            .field("evasion_high_threshold", &self.evasion_high_threshold)
            .finish_non_exhaustive()
    }
}
