//! Ban-evasion correlation.
//!
//! Correlates a signup/login's fingerprint, IP block, and email against
//! previously banned identities and scores the overlap. The decision
//! function is pure and separated from the store queries so the threshold
//! policy can be tested without any I/O.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::AuthResult;
use crate::store::CredentialStore;

const FINGERPRINT_WEIGHT: f64 = 0.5;
const IP_WEIGHT: f64 = 0.3;
const EMAIL_WEIGHT: f64 = 0.2;

/// Raw correlation hits against prior banned identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvasionSignals {
    pub fingerprint_match: bool,
    pub ip_match: bool,
    pub email_match: bool,
}

impl EvasionSignals {
    #[must_use]
    pub fn confidence(&self) -> f64 {
        let mut score = 0.0;
        if self.fingerprint_match {
            score += FINGERPRINT_WEIGHT;
        }
        if self.ip_match {
            score += IP_WEIGHT;
        }
        if self.email_match {
            score += EMAIL_WEIGHT;
        }
        score
    }
}

/// Two-tier policy outcome. `Detected` logs and alerts only; `ShadowBan`
/// marks the account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvasionVerdict {
    pub confidence: f64,
    pub detected: bool,
    pub should_shadow_ban: bool,
}

/// Pure threshold policy. Exactly the high threshold shadow-bans; exactly
/// the low threshold counts as detected.
#[must_use]
pub fn decide(confidence: f64, low_threshold: f64, high_threshold: f64) -> EvasionVerdict {
    EvasionVerdict {
        confidence,
        detected: confidence >= low_threshold,
        should_shadow_ban: confidence >= high_threshold,
    }
}

/// Collapse an email to its reuse-resistant form: lowercase, plus-tag
/// stripped, dots removed from the local part. `j.doe+x@example.com` and
/// `jdoe@example.com` correlate.
#[must_use]
pub fn canonicalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return email;
    };
    let local = local.split('+').next().unwrap_or(local);
    let local: String = local.chars().filter(|c| *c != '.').collect();
    format!("{local}@{domain}")
}

pub struct EvasionDetector {
    store: Arc<dyn CredentialStore>,
    low_threshold: f64,
    high_threshold: f64,
}

impl EvasionDetector {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, low_threshold: f64, high_threshold: f64) -> Self {
        Self {
            store,
            low_threshold,
            high_threshold,
        }
    }

    /// Gather signals against prior bans. A store error on any one signal
    /// degrades that signal to "no match" rather than failing the
    /// assessment; this path must never take down a login.
    pub async fn gather_signals(
        &self,
        fingerprint_hash: &str,
        ip_block: &str,
        email: &str,
    ) -> EvasionSignals {
        let fingerprint_match = self
            .store
            .banned_fingerprint_exists(fingerprint_hash)
            .await
            .unwrap_or(false);
        let ip_match = self
            .store
            .banned_ip_prefix_exists(ip_block)
            .await
            .unwrap_or(false);
        let canonical = canonicalize_email(email);
        let email_match = match self.store.banned_emails().await {
            Ok(banned) => banned
                .iter()
                .any(|candidate| canonicalize_email(candidate) == canonical),
            Err(_) => false,
        };
        EvasionSignals {
            fingerprint_match,
            ip_match,
            email_match,
        }
    }

    /// Full assessment: gather, score, decide, and apply the shadow-ban if
    /// warranted. Returns the verdict for callers that dispatch alerts.
    pub async fn assess(
        &self,
        user_id: Uuid,
        fingerprint_hash: &str,
        ip_block: &str,
        email: &str,
    ) -> AuthResult<EvasionVerdict> {
        let signals = self.gather_signals(fingerprint_hash, ip_block, email).await;
        let verdict = decide(signals.confidence(), self.low_threshold, self.high_threshold);
        if verdict.should_shadow_ban {
            warn!(
                %user_id,
                confidence = verdict.confidence,
                ?signals,
                "ban evasion: shadow-banning account"
            );
            self.store.set_shadow_banned(user_id).await?;
        } else if verdict.detected {
            info!(
                %user_id,
                confidence = verdict.confidence,
                ?signals,
                "ban evasion suspected, below action threshold"
            );
        }
        Ok(verdict)
    }
}

impl std::fmt::Debug for EvasionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvasionDetector")
            .field("low_threshold", &self.low_threshold)
            .field("high_threshold", &self.high_threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{canonicalize_email, decide, EvasionSignals};

    #[test]
    fn confidence_sums_weights() {
        let all = EvasionSignals {
            fingerprint_match: true,
            ip_match: true,
            email_match: true,
        };
        assert!((all.confidence() - 1.0).abs() < f64::EPSILON);
        assert!(EvasionSignals::default().confidence().abs() < f64::EPSILON);

        let fingerprint_only = EvasionSignals {
            fingerprint_match: true,
            ..Default::default()
        };
        assert!((fingerprint_only.confidence() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn exact_high_threshold_shadow_bans() {
        let verdict = decide(0.8, 0.4, 0.8);
        assert!(verdict.should_shadow_ban);
        assert!(verdict.detected);
    }

    #[test]
    fn just_below_high_threshold_only_detects() {
        let verdict = decide(0.7, 0.4, 0.8);
        assert!(!verdict.should_shadow_ban);
        assert!(verdict.detected);
    }

    #[test]
    fn zero_confidence_never_acts() {
        let verdict = decide(0.0, 0.4, 0.8);
        assert!(!verdict.should_shadow_ban);
        assert!(!verdict.detected);
    }

    #[test]
    fn below_low_threshold_is_clean() {
        let verdict = decide(0.3, 0.4, 0.8);
        assert!(!verdict.detected);
    }

    #[test]
    fn email_canonicalization_collapses_variants() {
        assert_eq!(
            canonicalize_email("J.Doe+throwaway@Example.COM"),
            "jdoe@example.com"
        );
        assert_eq!(canonicalize_email("jdoe@example.com"), "jdoe@example.com");
        assert_eq!(canonicalize_email("not-an-email"), "not-an-email");
    }
}
