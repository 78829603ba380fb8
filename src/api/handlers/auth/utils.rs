//! Request-context helpers shared by the auth handlers.

use axum::http::{header::USER_AGENT, HeaderMap};

use crate::session::DeviceInfo;

const UNKNOWN: &str = "unknown";

/// Client IP as reported by the proxy chain: first `X-Forwarded-For` entry,
/// falling back to `X-Real-IP`. No proxy header means no usable address.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| UNKNOWN.to_string(), |ip| ip.trim().to_string())
}

#[must_use]
pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map_or_else(|| UNKNOWN.to_string(), str::to_string)
}

/// Assemble the device description from headers plus the client-declared
/// device fields.
#[must_use]
pub fn device_info(headers: &HeaderMap, device_type: &str, device_name: &str) -> DeviceInfo {
    DeviceInfo {
        device_type: device_type.to_string(),
        device_name: device_name.to_string(),
        ip_address: client_ip(headers),
        user_agent: user_agent(headers),
    }
}
