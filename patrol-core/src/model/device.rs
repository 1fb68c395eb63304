use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An APNs endpoint belonging to a user's phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub apns_token: String,
    pub sandbox: bool,
    pub expires_at: DateTime<Utc>,
    pub grace_period_expires_at: DateTime<Utc>,
}

impl Device {
    pub fn within_grace_period(&self, now: DateTime<Utc>) -> bool {
        now < self.grace_period_expires_at
    }
}

/// The `device_accounts` join row: a many-to-many link between a device and
/// an account, carrying per-link notification toggles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceAccountLink {
    pub device_id: i64,
    pub account_id: i64,
    pub inbox_notifiable: bool,
    pub watcher_notifiable: bool,
    pub global_mute: bool,
}
