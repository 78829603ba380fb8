//! Route handlers.

pub mod auth;
pub mod health;

use axum::response::IntoResponse;

/// `GET /` — nothing to see here.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
