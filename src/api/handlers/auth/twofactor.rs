use axum::{extract::Extension, http::HeaderMap, response::IntoResponse, Json};
use std::sync::Arc;

use super::principal::require_auth;
use super::types::{BackupCodesResponse, CodeRequest, OkResponse, TwoFactorSetupResponse};
use crate::core::error::AuthResult;
use crate::core::AuthCore;

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/setup",
    responses(
        (status = 200, description = "Pending secret generated; 2FA not yet enabled.", body = TwoFactorSetupResponse),
        (status = 401, description = "Unauthenticated."),
        (status = 409, description = "2FA already enabled."),
    ),
    tag = "2fa"
)]
pub async fn setup(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    let user = core.user(principal.user_id).await?;
    let start = core
        .two_factor()
        .start_enrollment(principal.user_id, &user.email)
        .await?;
    Ok(Json(TwoFactorSetupResponse {
        secret: start.secret_base32,
        otpauth_uri: start.otpauth_uri,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enable",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "2FA enabled; backup codes shown once.", body = BackupCodesResponse),
        (status = 401, description = "Invalid code."),
    ),
    tag = "2fa"
)]
pub async fn enable(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<CodeRequest>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    let backup_codes = core
        .two_factor()
        .verify_and_enable(principal.user_id, &body.code)
        .await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/disable",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "2FA disabled.", body = OkResponse),
        (status = 401, description = "Invalid code."),
    ),
    tag = "2fa"
)]
pub async fn disable(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<CodeRequest>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    core.two_factor()
        .disable(principal.user_id, &body.code)
        .await?;
    Ok(Json(OkResponse::new()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/backup-codes",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Fresh backup codes; prior batch dead.", body = BackupCodesResponse),
        (status = 401, description = "Invalid code."),
    ),
    tag = "2fa"
)]
pub async fn backup_codes(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<CodeRequest>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    let backup_codes = core
        .two_factor()
        .regenerate_backup_codes(principal.user_id, &body.code)
        .await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}
