//! Backup code generation and verification.
//!
//! Codes are shown to the user exactly once at generation time; only Argon2
//! hashes (peppered) are stored. Verification normalizes user input so
//! `abcd-efgh-jklm` and `ABCDEFGHJKLM` both match.

use argon2::{
    password_hash::{rand_core::OsRng as HashOsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

use crate::core::error::{AuthError, AuthResult};

/// No I, O, 0, or 1: codes get read aloud and retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 12;
pub const BATCH_SIZE: usize = 10;

/// A freshly generated batch: plaintext codes for one-time display plus the
/// hashes to persist.
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub hashes: Vec<String>,
}

pub struct BackupCodes {
    pepper: SecretString,
}

impl BackupCodes {
    #[must_use]
    pub fn new(pepper: SecretString) -> Self {
        Self { pepper }
    }

    /// Generate a full batch of codes and their hashes.
    pub fn generate_batch(&self) -> AuthResult<BackupCodeBatch> {
        let mut codes = Vec::with_capacity(BATCH_SIZE);
        let mut hashes = Vec::with_capacity(BATCH_SIZE);
        for _ in 0..BATCH_SIZE {
            let code = random_code();
            hashes.push(self.hash(&code)?);
            codes.push(format_code(&code));
        }
        Ok(BackupCodeBatch { codes, hashes })
    }

    /// Return the index of the stored hash this code matches, if any.
    #[must_use]
    pub fn find_match(&self, input: &str, hashes: &[String]) -> Option<usize> {
        let normalized = normalize_code(input);
        if normalized.len() != CODE_LENGTH {
            return None;
        }
        let peppered = self.pepper_input(&normalized);
        hashes.iter().position(|hash| {
            PasswordHash::new(hash)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(peppered.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false)
        })
    }

    fn hash(&self, code: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut HashOsRng);
        let peppered = self.pepper_input(code);
        Argon2::default()
            .hash_password(peppered.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AuthError::Unavailable(anyhow::anyhow!("backup code hash: {err}")))
    }

    fn pepper_input(&self, code: &str) -> String {
        format!("{}{}", code, self.pepper.expose_secret())
    }
}

impl std::fmt::Debug for BackupCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCodes").finish_non_exhaustive()
    }
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Group as `XXXX-XXXX-XXXX` for display.
fn format_code(code: &str) -> String {
    format!("{}-{}-{}", &code[..4], &code[4..8], &code[8..])
}

/// Strip separators and uppercase.
fn normalize_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
