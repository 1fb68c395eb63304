use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote user credential the backend holds on behalf of some device(s).
///
/// `last_message_id` only ever advances to an item observed to exist and be
/// non-deleted; an empty value means the inbox has never been surfaced to
/// this account (see the notifications worker's no-first-flood rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub remote_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub last_message_id: String,
    pub next_notification_check_at: DateTime<Utc>,
    pub next_stuck_notification_check_at: DateTime<Utc>,
    pub check_count: i64,
}

impl Account {
    pub fn token_needs_refresh(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> bool {
        self.token_expires_at - now < horizon
    }

    pub fn has_watermark(&self) -> bool {
        !self.last_message_id.is_empty()
    }
}
