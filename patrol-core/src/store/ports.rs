use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::model::{Account, Device, DeviceAccountLink, LiveActivity, Subreddit, Watcher, WatchedUser};

/// Row-locking selection shared by every category: claim up to `limit` rows
/// whose clock has elapsed, ordered oldest-first, advancing the clock by
/// `interval` so a concurrent scheduler replica cannot also claim them
/// (`SELECT ... FOR UPDATE SKIP LOCKED`, see §4.1).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Account>>;

    /// Every non-deleted account with at least one device link still inside
    /// its grace period — the notifications category's fan-out candidate
    /// set (§4.1). Unlike every other category this does not gate on a
    /// clock column; the clock is the tick offset, not `next_check_at`.
    async fn list_fanout_candidates(&self) -> Result<Vec<i64>>;

    /// Bookkeeping only: records that this account was swept into a
    /// fan-out chunk. Does not gate future selection.
    async fn touch_notification_clock(&self, id: i64, next_check_at: DateTime<Utc>) -> Result<()>;

    async fn select_stuck_candidates(
        &self,
        limit: i64,
        interval: chrono::Duration,
    ) -> Result<Vec<i64>>;

    async fn update_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_watermark(&self, id: i64, last_message_id: &str) -> Result<()>;

    async fn touch_last_checked(&self, id: i64) -> Result<()>;

    /// Deletes accounts whose token has been stale past the threshold, or
    /// which have no device links at all. Returns the number removed.
    async fn prune_stale(&self, stale_token_threshold: chrono::Duration) -> Result<u64>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Device>>;

    async fn get_link(&self, device_id: i64, account_id: i64) -> Result<Option<DeviceAccountLink>>;

    /// Devices linked to `account_id` that are inbox-notifiable, not
    /// globally muted, and within their grace period.
    async fn list_inbox_notifiable(&self, account_id: i64) -> Result<Vec<Device>>;

    /// Deletes devices past both `expires_at` and `grace_period_expires_at`,
    /// dropping their account associations. Returns the number removed.
    async fn prune_expired(&self) -> Result<u64>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SubredditRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Subreddit>>;

    async fn select_due(&self, limit: i64, interval: chrono::Duration) -> Result<Vec<i64>>;

    async fn create_or_update(&self, remote_id: &str, name: &str) -> Result<Subreddit>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatchedUserRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<WatchedUser>>;

    async fn select_due(&self, limit: i64, interval: chrono::Duration) -> Result<Vec<i64>>;

    async fn create_or_update(&self, remote_id: &str, name: &str) -> Result<WatchedUser>;

    async fn delete(&self, id: i64) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WatcherRepository: Send + Sync {
    async fn list_for_subreddit(&self, subreddit_id: i64) -> Result<Vec<Watcher>>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Watcher>>;

    async fn delete_for_user(&self, user_id: i64) -> Result<u64>;

    /// Increments `hits` and advances `last_notified_at` to `notified_at`.
    async fn record_hit(&self, watcher_id: i64, notified_at: DateTime<Utc>) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LiveActivityRepository: Send + Sync {
    async fn get(&self, apns_token: &str) -> Result<Option<LiveActivity>>;

    async fn select_due(&self, limit: i64, interval: chrono::Duration) -> Result<Vec<String>>;

    async fn update_tokens(
        &self,
        apns_token: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn delete(&self, apns_token: &str) -> Result<()>;
}
