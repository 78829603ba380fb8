//! # Vigil (Session & Trust Security Core)
//!
//! `vigil` is the account-security core of the platform: session issuance
//! and revocation backed by signed bearer tokens, login lockout, TOTP
//! two-factor with single-use challenges and backup codes, coarse device
//! fingerprinting with ban-evasion correlation, staged trust promotion, and
//! an emergency panic lockdown.
//!
//! ## Sessions
//!
//! A bearer token is only a signed reference to a session row. Verification
//! requires both the signature and a live row, so revoking the row kills
//! every token for it immediately regardless of token expiry.
//!
//! ## Two-factor
//!
//! Enrollment is two-phase (secret stays pending until the first valid
//! code). Login challenges are single-use and burn on first consumption,
//! right or wrong code alike. Verification failures are deliberately
//! generic: the response never reveals which factor was wrong.
//!
//! ## Background work
//!
//! Evasion scoring, new-device notifications, and trust re-evaluation run
//! on a bounded task queue after the response is sent; their failures are
//! logged, never surfaced.

pub mod api;
pub mod cli;
pub mod core;
pub mod device;
pub mod lockdown;
pub mod lockout;
pub mod notify;
pub mod session;
pub mod store;
pub mod tasks;
pub mod trust;
pub mod twofactor;

pub use api::{APP_USER_AGENT, GIT_COMMIT_HASH};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
