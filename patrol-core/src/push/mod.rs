//! Push delivery: a thin transport trait (`PushClient`) plus the payload
//! construction the core owns outright (`payload`). The wire format itself
//! — HTTP/2 framing, provider auth — is `apns`'s problem; workers never see
//! it, only `Notification` in and `PushResponse` out.

mod apns;
pub mod payload;

pub use apns::{ApnsClient, ApnsSigningKey};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

/// The priority header APNs exposes; `Immediate` bypasses Apple's
/// power-saving coalescing, `Conserving` allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Immediate,
    Conserving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    LiveActivity,
}

impl PushType {
    fn header_value(self) -> &'static str {
        match self {
            PushType::Alert => "alert",
            PushType::Background => "background",
            PushType::LiveActivity => "liveactivity",
        }
    }
}

/// One outbound push, provider-agnostic. `topic` is the bundle id, suffixed
/// with `.push-type.liveactivity` by callers that need the Live Activity
/// variant (see `payload::live_activity_update`).
#[derive(Debug, Clone)]
pub struct Notification {
    pub device_token: String,
    pub sandbox: bool,
    pub topic: String,
    pub push_type: Option<PushType>,
    pub collapse_id: Option<String>,
    pub expiration: Option<chrono::DateTime<chrono::Utc>>,
    pub priority: Priority,
    pub payload: Value,
}

/// Provider response. `sent` is `false` for responses that mean "this token
/// is dead" (`BadDeviceToken`, `Unregistered`, 410 Gone) — callers use it to
/// decide whether to drop the owning row.
#[derive(Debug, Clone)]
pub struct PushResponse {
    pub status: u16,
    pub apns_id: Option<String>,
    pub reason: Option<String>,
    pub sent: bool,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn push(&self, notification: Notification) -> crate::error::Result<PushResponse>;
}
