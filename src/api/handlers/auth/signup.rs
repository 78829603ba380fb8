use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::principal::require_auth;
use super::types::{AuthResponse, OkResponse, PasswordRequest, SignupRequest};
use super::utils::device_info;
use crate::core::error::AuthResult;
use crate::core::AuthCore;

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created and signed in.", body = AuthResponse),
        (status = 400, description = "Malformed email, weak password, or bad enrollment code."),
        (status = 409, description = "Email already registered."),
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<SignupRequest>,
) -> AuthResult<impl IntoResponse> {
    let device = device_info(&headers, &body.device_type, &body.device_name);
    let outcome = core
        .signup(
            &body.email,
            &body.password,
            &device,
            body.enrollment_code.as_deref(),
            body.remember_me,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(AuthResponse::from(outcome))))
}

#[utoipa::path(
    delete,
    path = "/v1/auth/account",
    request_body = PasswordRequest,
    responses(
        (status = 200, description = "Account anonymized, all sessions destroyed.", body = OkResponse),
        (status = 401, description = "Unauthenticated or wrong password."),
    ),
    tag = "auth"
)]
pub async fn delete_account(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<PasswordRequest>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    core.delete_account(principal.user_id, &body.password).await?;
    Ok(Json(OkResponse::new()))
}
