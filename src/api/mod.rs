//! HTTP surface: router assembly and server startup.

pub mod handlers;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::core::AuthCore;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Build the full application router.
#[must_use]
pub fn router(core: Arc<AuthCore>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health::health))
        .merge(handlers::auth::routes())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(core)),
        )
}

/// Start the server.
/// # Errors
/// Return error if failed to bind the port or the server terminates.
pub async fn serve(port: u16, core: Arc<AuthCore>, allowed_origin: Option<&str>) -> Result<()> {
    let mut app = router(core);
    if let Some(origin) = allowed_origin {
        let cors = CorsLayer::new()
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_origin(AllowOrigin::exact(parse_origin(origin)?))
            .allow_credentials(true);
        app = app.layer(cors);
    }

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn parse_origin(base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(base_url).with_context(|| format!("Invalid origin URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .with_context(|| format!("Origin URL must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::parse_origin;

    #[test]
    fn origin_drops_path_and_keeps_port() {
        let origin = parse_origin("https://app.example.com:8443/login").unwrap();
        assert_eq!(origin, "https://app.example.com:8443");
    }

    #[test]
    fn origin_rejects_garbage() {
        assert!(parse_origin("not a url").is_err());
    }
}
