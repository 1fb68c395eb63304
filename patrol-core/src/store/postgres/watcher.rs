use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CoreError, Result};
use crate::model::{Watcher, WatcherType};
use crate::store::ports::WatcherRepository;

#[derive(Debug, Clone)]
pub struct PostgresWatcherRepository {
    pool: PgPool,
}

impl PostgresWatcherRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Watcher> {
        let watcher_type: String = row
            .try_get("watcher_type")
            .map_err(|e| CoreError::Internal(format!("failed to read watcher_type: {e}")))?;
        let watcher_type = match watcher_type.as_str() {
            "subreddit" => WatcherType::Subreddit,
            "user" => WatcherType::User,
            "trending" => WatcherType::Trending,
            other => {
                return Err(CoreError::Internal(format!("unknown watcher_type: {other}")));
            }
        };

        Ok(Watcher {
            id: row
                .try_get("id")
                .map_err(|e| CoreError::Internal(format!("failed to read watcher id: {e}")))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| CoreError::Internal(format!("failed to read created_at: {e}")))?,
            last_notified_at: row
                .try_get("last_notified_at")
                .map_err(|e| CoreError::Internal(format!("failed to read last_notified_at: {e}")))?,
            label: row
                .try_get("label")
                .map_err(|e| CoreError::Internal(format!("failed to read label: {e}")))?,
            device_id: row
                .try_get("device_id")
                .map_err(|e| CoreError::Internal(format!("failed to read device_id: {e}")))?,
            account_id: row
                .try_get("account_id")
                .map_err(|e| CoreError::Internal(format!("failed to read account_id: {e}")))?,
            watcher_type,
            watchee_id: row
                .try_get("watchee_id")
                .map_err(|e| CoreError::Internal(format!("failed to read watchee_id: {e}")))?,
            author: row
                .try_get("author")
                .map_err(|e| CoreError::Internal(format!("failed to read author: {e}")))?,
            subreddit: row
                .try_get("subreddit")
                .map_err(|e| CoreError::Internal(format!("failed to read subreddit: {e}")))?,
            min_upvotes: row
                .try_get("min_upvotes")
                .map_err(|e| CoreError::Internal(format!("failed to read min_upvotes: {e}")))?,
            keyword: row
                .try_get("keyword")
                .map_err(|e| CoreError::Internal(format!("failed to read keyword: {e}")))?,
            flair: row
                .try_get("flair")
                .map_err(|e| CoreError::Internal(format!("failed to read flair: {e}")))?,
            domain: row
                .try_get("domain")
                .map_err(|e| CoreError::Internal(format!("failed to read domain: {e}")))?,
            hits: row
                .try_get("hits")
                .map_err(|e| CoreError::Internal(format!("failed to read hits: {e}")))?,
        })
    }

    const COLUMNS: &'static str = "id, created_at, last_notified_at, label, device_id, account_id, \
        watcher_type, watchee_id, author, subreddit, min_upvotes, keyword, flair, domain, hits";
}

#[async_trait]
impl WatcherRepository for PostgresWatcherRepository {
    async fn list_for_subreddit(&self, subreddit_id: i64) -> Result<Vec<Watcher>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM watchers WHERE watcher_type = 'subreddit' AND watchee_id = $1",
            Self::COLUMNS
        ))
        .bind(subreddit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to list subreddit watchers: {e}")))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Watcher>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM watchers WHERE watcher_type = 'user' AND watchee_id = $1",
            Self::COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to list user watchers: {e}")))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM watchers WHERE watcher_type = 'user' AND watchee_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to delete user watchers: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn record_hit(&self, watcher_id: i64, notified_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE watchers SET hits = hits + 1, last_notified_at = $2 WHERE id = $1")
            .bind(watcher_id)
            .bind(notified_at)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to record watcher hit: {e}")))?;

        Ok(())
    }
}
