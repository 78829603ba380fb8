//! Security notification dispatch abstractions.
//!
//! Events are delivered fire-and-forget from background tasks; a notifier
//! failure marks the event failed in logs and nothing else. The default
//! notifier for local dev is [`LogNotifier`], which logs and returns
//! `Ok(())`. Real deployments implement [`Notifier`] against their push and
//! email providers.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Events worth telling the account owner (or operators) about.
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    /// First login from a device class never seen on this account.
    NewDevice {
        user_id: Uuid,
        device_name: String,
        device_type: String,
        masked_ip: String,
        at: DateTime<Utc>,
    },
    /// Panic lockdown was engaged; all sessions destroyed.
    PanicLockdown { user_id: Uuid, revoked_sessions: u64 },
    /// Evasion correlation crossed a threshold.
    EvasionAlert {
        user_id: Uuid,
        confidence: f64,
        shadow_banned: bool,
    },
}

/// Delivery abstraction. One event may fan out to several channels; the
/// implementation decides which.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: SecurityEvent) -> Result<()>;
}

/// Local dev notifier that logs the event instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: SecurityEvent) -> Result<()> {
        match &event {
            SecurityEvent::NewDevice {
                user_id,
                device_name,
                device_type,
                masked_ip,
                at,
            } => info!(
                %user_id,
                device_name = %device_name,
                device_type = %device_type,
                ip = %masked_ip,
                %at,
                "notification stub: new device login"
            ),
            SecurityEvent::PanicLockdown {
                user_id,
                revoked_sessions,
            } => info!(
                %user_id,
                revoked_sessions,
                "notification stub: panic lockdown"
            ),
            SecurityEvent::EvasionAlert {
                user_id,
                confidence,
                shadow_banned,
            } => info!(
                %user_id,
                confidence,
                shadow_banned,
                "notification stub: evasion alert"
            ),
        }
        Ok(())
    }
}
