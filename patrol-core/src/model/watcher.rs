use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of watchee a [`Watcher`] observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherType {
    Subreddit,
    User,
    Trending,
}

impl WatcherType {
    pub fn as_str(self) -> &'static str {
        match self {
            WatcherType::Subreddit => "subreddit",
            WatcherType::User => "user",
            WatcherType::Trending => "trending",
        }
    }
}

/// A rule: "notify this device via this account when content matching these
/// criteria appears at this watchee." Criteria are ANDed; empty criteria
/// fields are ignored (see [`crate::watcher_match`] for the matching law).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    pub label: String,
    pub device_id: i64,
    pub account_id: i64,
    pub watcher_type: WatcherType,
    pub watchee_id: i64,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub min_upvotes: Option<i64>,
    pub keyword: Option<String>,
    pub flair: Option<String>,
    pub domain: Option<String>,
    pub hits: i64,
}

impl Watcher {
    /// §3 invariant: a watcher only fires for posts created at or after both
    /// its own creation and the last time it notified.
    pub fn allows_post_at(&self, post_created_at: DateTime<Utc>) -> bool {
        post_created_at >= self.created_at && post_created_at >= self.last_notified_at
    }
}
