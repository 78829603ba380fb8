use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::principal::{bearer_token, require_auth};
use super::types::{OkResponse, RevokedResponse, SessionListResponse};
use crate::core::error::AuthResult;
use crate::core::AuthCore;

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session ended; safe to repeat.", body = OkResponse),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
) -> AuthResult<impl IntoResponse> {
    // A missing or dead token logs out just as successfully as a live one.
    if let Some(token) = bearer_token(&headers) {
        core.sessions().logout(token).await?;
    }
    Ok(Json(OkResponse::new()))
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Unexpired sessions, current one flagged.", body = SessionListResponse),
        (status = 401, description = "Unauthenticated."),
    ),
    tag = "auth"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    let sessions = core.sessions().list(&principal).await?;
    Ok(Json(SessionListResponse { sessions }))
}

#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id to revoke")),
    responses(
        (status = 200, description = "Session revoked (or already gone).", body = OkResponse),
        (status = 400, description = "Attempted to revoke the current session."),
        (status = 403, description = "Session belongs to another user."),
        (status = 401, description = "Unauthenticated."),
    ),
    tag = "auth"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
    Path(id): Path<Uuid>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    core.sessions().revoke(id, &principal).await?;
    Ok(Json(OkResponse::new()))
}

#[utoipa::path(
    post,
    path = "/v1/auth/sessions/revoke-others",
    responses(
        (status = 200, description = "Every other session revoked.", body = RevokedResponse),
        (status = 401, description = "Unauthenticated."),
    ),
    tag = "auth"
)]
pub async fn revoke_other_sessions(
    headers: HeaderMap,
    core: Extension<Arc<AuthCore>>,
) -> AuthResult<impl IntoResponse> {
    let principal = require_auth(&headers, &core).await?;
    let revoked = core
        .sessions()
        .revoke_all(principal.user_id, Some(principal.session_id))
        .await?;
    Ok(Json(RevokedResponse { revoked }))
}
