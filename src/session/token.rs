//! Bearer token signing.
//!
//! Tokens are HS256 JWTs carrying only `{sub: user, sid: session}` plus the
//! standard timestamps. A valid signature is never sufficient on its own:
//! [`crate::session::SessionManager::verify`] also requires the referenced
//! session row to exist and be unexpired, so revocation takes effect
//! immediately.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{AuthError, AuthResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenSigner {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
        }
    }

    /// Sign a token referencing a session row. The token expiry mirrors the
    /// session row's `expires_at`.
    pub fn sign(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let claims = Claims {
            sub: user_id,
            sid: session_id,
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Unavailable(anyhow::Error::new(err)))
    }

    /// Decode and verify a token's signature and expiry. Any failure is a
    /// generic authentication error.
    pub fn decode(&self, token: &str) -> AuthResult<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::Authentication)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::TokenSigner;
    use crate::core::error::AuthError;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn signer() -> TokenSigner {
        TokenSigner::new(&"unit-test-signing-secret".into())
    }

    #[test]
    fn sign_and_decode_round_trip() {
        let signer = signer();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let token = signer
            .sign(user_id, session_id, Utc::now() + Duration::hours(1))
            .unwrap();
        let claims = signer.decode(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, session_id);
    }

    #[test]
    fn expired_token_rejected() {
        let signer = signer();
        let token = signer
            .sign(Uuid::new_v4(), Uuid::new_v4(), Utc::now() - Duration::hours(1))
            .unwrap();
        assert!(matches!(
            signer.decode(&token),
            Err(AuthError::Authentication)
        ));
    }

    #[test]
    fn wrong_key_rejected() {
        let token = signer()
            .sign(Uuid::new_v4(), Uuid::new_v4(), Utc::now() + Duration::hours(1))
            .unwrap();
        let other = TokenSigner::new(&"different-secret".into());
        assert!(matches!(
            other.decode(&token),
            Err(AuthError::Authentication)
        ));
    }

    #[test]
    fn garbage_token_rejected() {
        assert!(matches!(
            signer().decode("not.a.jwt"),
            Err(AuthError::Authentication)
        ));
    }
}
