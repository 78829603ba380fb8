use axum::{extract::Extension, http::HeaderMap, response::IntoResponse, Json};
use std::sync::Arc;

use super::principal::require_auth;
use super::types::{OkResponse, UnlockRequest};
use crate::core::error::AuthResult;
use crate::core::AuthCore;

#[utoipa::path(
    post,
    path = "/v1/auth/panic",
    responses(
        (status = 200, description = "Account locked, every session destroyed.", body = OkResponse),
        (status = 401, description = "Unauthenticated."),
    ),
    tag = "lockdown"
)]
pub async fn panic(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    core.panic(principal.user_id).await?;
    Ok(Json(OkResponse::new()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/unlock",
    request_body = UnlockRequest,
    responses(
        (status = 200, description = "Panic lock cleared.", body = OkResponse),
        (status = 401, description = "Invalid credentials."),
        (status = 423, description = "Lock not clearable through this path."),
    ),
    tag = "lockdown"
)]
pub async fn unlock(
    core: Extension<Arc<AuthCore>>,
    Json(body): Json<UnlockRequest>,
) -> AuthResult<impl IntoResponse> {
    core.lockdown().unlock(&body.email, &body.password).await?;
    Ok(Json(OkResponse::new()))
}
