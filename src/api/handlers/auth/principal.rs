//! Authenticated principal extraction.
//!
//! Reads the bearer token, verifies signature and session row through the
//! core, and hands downstream handlers a [`Principal`]. Missing and invalid
//! tokens are indistinguishable to the caller.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::core::error::{AuthError, AuthResult};
use crate::core::AuthCore;
use crate::session::Principal;

/// Pull the raw bearer token out of the Authorization header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the request's bearer token into a principal, or 401.
pub async fn require_auth(headers: &HeaderMap, core: &AuthCore) -> AuthResult<Principal> {
    let token = bearer_token(headers).ok_or(AuthError::Authentication)?;
    core.sessions().verify(token).await
}

#[cfg(test)]
mod tests {
    use super::bearer_token;
    use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};

    #[test]
    fn extracts_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn rejects_other_schemes_and_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
