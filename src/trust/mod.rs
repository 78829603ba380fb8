//! Account trust levels and promotion rules.
//!
//! Trust only moves upward through normal operation. Demotion is an
//! administrative action outside this engine, so `evaluate_promotion` never
//! returns a level below the current one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::UserRecord;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Unverified,
    EmailVerified,
    Established,
    Elevated,
}

impl TrustLevel {
    #[must_use]
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Unverified => 0,
            Self::EmailVerified => 1,
            Self::Established => 2,
            Self::Elevated => 3,
        }
    }

    /// Unknown values collapse to `Unverified` rather than failing the row
    /// load; a corrupt trust column must not lock a user out of login.
    #[must_use]
    pub const fn from_i16(value: i16) -> Self {
        match value {
            1 => Self::EmailVerified,
            2 => Self::Established,
            3 => Self::Elevated,
            _ => Self::Unverified,
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unverified => "unverified",
            Self::EmailVerified => "email_verified",
            Self::Established => "established",
            Self::Elevated => "elevated",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrustEngine {
    established_age: Duration,
    elevated_age: Duration,
}

impl TrustEngine {
    #[must_use]
    pub fn new(established_age_days: i64, elevated_age_days: i64) -> Self {
        Self {
            established_age: Duration::days(established_age_days),
            elevated_age: Duration::days(elevated_age_days),
        }
    }

    /// Compute the level a user qualifies for right now, floored at their
    /// current level. Returns `None` when no change is warranted.
    #[must_use]
    pub fn evaluate_promotion(&self, user: &UserRecord, now: DateTime<Utc>) -> Option<TrustLevel> {
        let earned = self.earned_level(user, now);
        if earned > user.trust_level {
            Some(earned)
        } else {
            None
        }
    }

    fn earned_level(&self, user: &UserRecord, now: DateTime<Utc>) -> TrustLevel {
        if !user.email_verified {
            return TrustLevel::Unverified;
        }
        let age = now - user.created_at;
        let flagged = user.is_banned || user.is_shadow_banned || user.is_locked;
        if flagged || age < self.established_age {
            return TrustLevel::EmailVerified;
        }
        if user.two_factor_enabled && age >= self.elevated_age {
            return TrustLevel::Elevated;
        }
        TrustLevel::Established
    }
}

#[cfg(test)]
mod tests {
    use super::{TrustEngine, TrustLevel};
    use crate::store::UserRecord;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn user(age_days: i64) -> UserRecord {
        let now = Utc::now();
        UserRecord {
            id: Uuid::new_v4(),
            email: "t@example.com".to_string(),
            password_hash: Some("hash".to_string()),
            oauth_subject: None,
            trust_level: TrustLevel::Unverified,
            email_verified: true,
            two_factor_enabled: false,
            is_locked: false,
            lock_reason: None,
            is_banned: false,
            is_shadow_banned: false,
            device_fingerprint: None,
            created_at: now - Duration::days(age_days),
        }
    }

    fn engine() -> TrustEngine {
        TrustEngine::new(7, 30)
    }

    #[test]
    fn ordering_matches_numeric_codes() {
        assert!(TrustLevel::Unverified < TrustLevel::EmailVerified);
        assert!(TrustLevel::EmailVerified < TrustLevel::Established);
        assert!(TrustLevel::Established < TrustLevel::Elevated);
        for code in 0..=3 {
            assert_eq!(TrustLevel::from_i16(code).as_i16(), code);
        }
        assert_eq!(TrustLevel::from_i16(99), TrustLevel::Unverified);
    }

    #[test]
    fn unverified_email_earns_nothing() {
        let mut u = user(100);
        u.email_verified = false;
        assert_eq!(engine().evaluate_promotion(&u, Utc::now()), None);
    }

    #[test]
    fn verified_email_promotes_immediately() {
        let u = user(0);
        assert_eq!(
            engine().evaluate_promotion(&u, Utc::now()),
            Some(TrustLevel::EmailVerified)
        );
    }

    #[test]
    fn established_needs_age_and_clean_record() {
        let u = user(8);
        assert_eq!(
            engine().evaluate_promotion(&u, Utc::now()),
            Some(TrustLevel::Established)
        );

        let mut flagged = user(8);
        flagged.is_shadow_banned = true;
        assert_eq!(
            engine().evaluate_promotion(&flagged, Utc::now()),
            Some(TrustLevel::EmailVerified)
        );
    }

    #[test]
    fn elevated_needs_two_factor_and_age() {
        let mut u = user(31);
        u.two_factor_enabled = true;
        assert_eq!(
            engine().evaluate_promotion(&u, Utc::now()),
            Some(TrustLevel::Elevated)
        );

        // 2FA alone is not enough before the age gate.
        let mut young = user(10);
        young.two_factor_enabled = true;
        assert_eq!(
            engine().evaluate_promotion(&young, Utc::now()),
            Some(TrustLevel::Established)
        );
    }

    #[test]
    fn never_demotes() {
        let mut u = user(100);
        u.trust_level = TrustLevel::Elevated;
        u.two_factor_enabled = false;
        assert_eq!(engine().evaluate_promotion(&u, Utc::now()), None);
    }
}
