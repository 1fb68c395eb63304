use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An upstream user account being watched by one or more [`super::Watcher`]s.
///
/// Named `WatchedUser` rather than `User` to keep it unambiguous next to
/// [`super::Account`], which is the backend's own credentialed user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedUser {
    pub id: i64,
    pub remote_id: String,
    pub name: String,
    pub next_check_at: DateTime<Utc>,
}
