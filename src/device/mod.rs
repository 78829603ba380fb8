//! Device fingerprinting and new-device detection.
//!
//! The fingerprint is deliberately coarse: it hashes low-entropy request
//! signals (user agent, declared device type/name, IP block) so that the
//! same person on the same class of device hashes the same way. It is a
//! device-class recognizer, not an identifier.

pub mod evasion;

use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::AuthResult;
use crate::session::DeviceInfo;
use crate::store::CredentialStore;

/// Hash the coarse device signals. Stable across logins from the same
/// device class; the IP contributes only its block, not the full address.
#[must_use]
pub fn fingerprint(device: &DeviceInfo) -> String {
    let block = ip_block(&device.ip_address);
    let input = format!(
        "{}|{}|{}|{}",
        device.user_agent, device.device_type, device.device_name, block
    );
    let digest = Sha256::digest(input.as_bytes());
    format!("{digest:x}")
}

/// Coarse network identity: the /24 for IPv4, the first two groups for
/// IPv6. Keeps the trailing separator so `10.1.2.` never matches `10.1.20.`
/// as a prefix.
#[must_use]
pub fn ip_block(ip: &str) -> String {
    if ip.contains(':') {
        let groups: Vec<&str> = ip.split(':').take(2).collect();
        return format!("{}:", groups.join(":"));
    }
    match ip.rfind('.') {
        Some(last_dot) => format!("{}.", &ip[..last_dot]),
        None => ip.to_string(),
    }
}

#[derive(Clone)]
pub struct DeviceDetector {
    store: Arc<dyn CredentialStore>,
}

impl DeviceDetector {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// A device is first-seen when no other session for the user carries
    /// its fingerprint. The freshly issued session is excluded so the login
    /// that introduced the device still counts as new.
    pub async fn is_first_seen(
        &self,
        user_id: Uuid,
        fingerprint_hash: &str,
        current_session: Uuid,
    ) -> AuthResult<bool> {
        let sessions = self.store.sessions_for_user(user_id).await?;
        Ok(!sessions
            .iter()
            .any(|row| row.id != current_session && row.fingerprint_hash == fingerprint_hash))
    }
}

impl std::fmt::Debug for DeviceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDetector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{fingerprint, ip_block};
    use crate::session::DeviceInfo;

    fn device(ip: &str) -> DeviceInfo {
        DeviceInfo {
            device_type: "mobile".to_string(),
            device_name: "Pixel 8".to_string(),
            ip_address: ip.to_string(),
            user_agent: "okhttp/4.12".to_string(),
        }
    }

    #[test]
    fn stable_within_ip_block() {
        let a = fingerprint(&device("203.0.113.7"));
        let b = fingerprint(&device("203.0.113.200"));
        assert_eq!(a, b);
    }

    #[test]
    fn changes_across_blocks_and_agents() {
        let base = fingerprint(&device("203.0.113.7"));
        assert_ne!(base, fingerprint(&device("198.51.100.7")));

        let mut other = device("203.0.113.7");
        other.user_agent = "Mozilla/5.0".to_string();
        assert_ne!(base, fingerprint(&other));
    }

    #[test]
    fn ip_block_keeps_trailing_separator() {
        assert_eq!(ip_block("203.0.113.7"), "203.0.113.");
        assert_eq!(ip_block("2001:db8:1:2::5"), "2001:db8:");
        assert_eq!(ip_block("unknown"), "unknown");
    }
}
