use crate::api::GIT_COMMIT_HASH;
use crate::core::AuthCore;
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Credential store is healthy", body = [Health]),
        (status = 503, description = "Credential store is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(core: Extension<Arc<AuthCore>>) -> impl IntoResponse {
    let store_ok = core.store_healthy().await;
    if store_ok {
        debug!("Credential store is healthy");
    } else {
        error!("Credential store is unhealthy");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_ok {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) =
        format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>()
    {
        headers.insert("X-App", value);
    }

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, headers, Json(health))
}
