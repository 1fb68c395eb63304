use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short-lived "ongoing event" notification session bound to one APNs
/// token and one remote discussion thread. `apns_token` is also the row's
/// identity. `expires_at` is fixed at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveActivity {
    pub apns_token: String,
    pub remote_account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub thread_id: String,
    pub subreddit: String,
    pub next_check_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LiveActivity {
    pub fn is_terminal(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
