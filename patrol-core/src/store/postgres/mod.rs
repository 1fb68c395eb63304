mod account;
mod device;
mod live_activity;
mod subreddit;
mod user;
mod watcher;

pub use account::PostgresAccountRepository;
pub use device::PostgresDeviceRepository;
pub use live_activity::PostgresLiveActivityRepository;
pub use subreddit::PostgresSubredditRepository;
pub use user::PostgresWatchedUserRepository;
pub use watcher::PostgresWatcherRepository;

use sqlx::PgPool;
use std::sync::Arc;

use super::ports::{
    AccountRepository, DeviceRepository, LiveActivityRepository, SubredditRepository,
    WatchedUserRepository, WatcherRepository,
};

/// A bundle of Postgres-backed repositories sharing one pool, handed to the
/// scheduler and workers as trait objects so each only depends on the ports
/// it actually calls.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    pub accounts: Arc<dyn AccountRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub subreddits: Arc<dyn SubredditRepository>,
    pub watched_users: Arc<dyn WatchedUserRepository>,
    pub watchers: Arc<dyn WatcherRepository>,
    pub live_activities: Arc<dyn LiveActivityRepository>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            accounts: Arc::new(PostgresAccountRepository::new(pool.clone())),
            devices: Arc::new(PostgresDeviceRepository::new(pool.clone())),
            subreddits: Arc::new(PostgresSubredditRepository::new(pool.clone())),
            watched_users: Arc::new(PostgresWatchedUserRepository::new(pool.clone())),
            watchers: Arc::new(PostgresWatcherRepository::new(pool.clone())),
            live_activities: Arc::new(PostgresLiveActivityRepository::new(pool.clone())),
            pool,
        }
    }

    /// Row counts for the reporter's gauges (§4.1 "Reporter"). Not part of
    /// any `*Repository` port — it's a cross-table concern the scheduler
    /// alone needs.
    pub async fn table_row_counts(&self) -> crate::error::Result<Vec<(&'static str, i64)>> {
        let tables = ["accounts", "devices", "subreddits", "watched_users", "live_activities"];
        let mut counts = Vec::with_capacity(tables.len());

        for table in tables {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| crate::error::CoreError::Internal(format!("failed to count {table}: {e}")))?;
            counts.push((table, count));
        }

        Ok(counts)
    }
}

#[cfg(test)]
impl PostgresStore {
    /// Swaps every repository for a caller-supplied fake. `pool` connects
    /// lazily (no network touched on construction) since nothing a handler
    /// test exercises calls `table_row_counts`.
    pub fn new_for_test(
        accounts: Arc<dyn AccountRepository>,
        devices: Arc<dyn DeviceRepository>,
        subreddits: Arc<dyn SubredditRepository>,
        watched_users: Arc<dyn WatchedUserRepository>,
        watchers: Arc<dyn WatcherRepository>,
        live_activities: Arc<dyn LiveActivityRepository>,
    ) -> Self {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://unused/unused")
            .expect("lazy pool construction never touches the network");
        Self {
            pool,
            accounts,
            devices,
            subreddits,
            watched_users,
            watchers,
            live_activities,
        }
    }
}
