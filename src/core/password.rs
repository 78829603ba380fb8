//! Password hashing collaborator.
//!
//! Argon2id with library-default parameters. The core only specifies how the
//! primitive is used: hash on signup, verify on login/unlock, never store or
//! log the raw password.

use anyhow::Result;
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored hash. Parse failures count as
/// mismatches so a corrupt row cannot open an account.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{hash_password, verify_password};

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn corrupt_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same input").unwrap();
        let second = hash_password("same input").unwrap();
        assert_ne!(first, second);
    }
}
