//! Authentication handlers.
//!
//! All state arrives through `Extension<Arc<AuthCore>>`; the handlers stay
//! thin and push every decision into the core so the HTTP layer never owns
//! security logic.

pub(crate) mod principal;
pub(crate) mod types;
mod utils;

mod lockdown;
mod login;
mod session;
mod signup;
mod twofactor;

use axum::{
    routing::{delete, get, post},
    Router,
};

/// Routes under `/v1/auth`.
#[must_use]
pub fn routes() -> Router {
    Router::new()
        .route("/v1/auth/signup", post(signup::signup))
        .route("/v1/auth/account", delete(signup::delete_account))
        .route("/v1/auth/login", post(login::login))
        .route("/v1/auth/login/2fa", post(login::complete_two_factor))
        .route("/v1/auth/logout", post(session::logout))
        .route("/v1/auth/sessions", get(session::list_sessions))
        .route("/v1/auth/sessions/:id", delete(session::revoke_session))
        .route(
            "/v1/auth/sessions/revoke-others",
            post(session::revoke_other_sessions),
        )
        .route("/v1/auth/2fa/setup", post(twofactor::setup))
        .route("/v1/auth/2fa/enable", post(twofactor::enable))
        .route("/v1/auth/2fa/disable", post(twofactor::disable))
        .route("/v1/auth/2fa/backup-codes", post(twofactor::backup_codes))
        .route("/v1/auth/panic", post(lockdown::panic))
        .route("/v1/auth/unlock", post(lockdown::unlock))
}
