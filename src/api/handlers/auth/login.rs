use axum::{extract::Extension, http::HeaderMap, response::IntoResponse, Json};
use std::sync::Arc;

use super::types::{AuthResponse, LoginRequest, LoginResponse, TwoFactorLoginRequest};
use super::utils::device_info;
use crate::core::error::AuthResult;
use crate::core::{AuthCore, LoginOutcome};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in, or paused at the 2FA gate.", body = LoginResponse),
        (status = 401, description = "Invalid credentials."),
        (status = 423, description = "Account locked."),
        (status = 429, description = "Too many failed attempts."),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<LoginRequest>,
) -> AuthResult<impl IntoResponse> {
    let device = device_info(&headers, &body.device_type, &body.device_name);
    let outcome = core
        .login(&body.email, &body.password, &device, body.remember_me)
        .await?;
    let response = match outcome {
        LoginOutcome::Complete(outcome) => LoginResponse::Complete(AuthResponse::from(outcome)),
        LoginOutcome::TwoFactorRequired { challenge_token } => LoginResponse::TwoFactorRequired {
            requires_2fa: true,
            challenge_token,
        },
    };
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login/2fa",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Challenge completed, session issued.", body = AuthResponse),
        (status = 401, description = "Invalid or expired challenge or code."),
    ),
    tag = "auth"
)]
pub async fn complete_two_factor(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<TwoFactorLoginRequest>,
) -> AuthResult<impl IntoResponse> {
    let device = device_info(&headers, &body.device_type, &body.device_name);
    let outcome = core
        .complete_two_factor(&body.challenge_token, &body.code, &device, body.remember_me)
        .await?;
    Ok(Json(AuthResponse::from(outcome)))
}
