use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CoreError, Result};
use crate::model::Subreddit;
use crate::store::ports::SubredditRepository;

#[derive(Debug, Clone)]
pub struct PostgresSubredditRepository {
    pool: PgPool,
}

impl PostgresSubredditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Subreddit> {
        Ok(Subreddit {
            id: row
                .try_get("id")
                .map_err(|e| CoreError::Internal(format!("failed to read subreddit id: {e}")))?,
            remote_id: row
                .try_get("remote_id")
                .map_err(|e| CoreError::Internal(format!("failed to read remote_id: {e}")))?,
            name: row
                .try_get("name")
                .map_err(|e| CoreError::Internal(format!("failed to read name: {e}")))?,
            next_check_at: row
                .try_get("next_check_at")
                .map_err(|e| CoreError::Internal(format!("failed to read next_check_at: {e}")))?,
        })
    }
}

#[async_trait]
impl SubredditRepository for PostgresSubredditRepository {
    async fn get(&self, id: i64) -> Result<Option<Subreddit>> {
        let row = sqlx::query("SELECT id, remote_id, name, next_check_at FROM subreddits WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to load subreddit {id}: {e}")))?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    async fn select_due(&self, limit: i64, interval: Duration) -> Result<Vec<i64>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id FROM subreddits
                WHERE next_check_at < $1
                ORDER BY next_check_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE subreddits
            SET next_check_at = $1 + $3 * INTERVAL '1 second'
            FROM due
            WHERE subreddits.id = due.id
            RETURNING subreddits.id
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(interval.num_seconds())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to select due subreddits: {e}")))?;

        rows.into_iter()
            .map(|r| {
                r.try_get::<i64, _>("id")
                    .map_err(|e| CoreError::Internal(format!("failed to read subreddit id: {e}")))
            })
            .collect()
    }

    async fn create_or_update(&self, remote_id: &str, name: &str) -> Result<Subreddit> {
        let row = sqlx::query(
            r#"
            INSERT INTO subreddits (remote_id, name, next_check_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (remote_id) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, remote_id, name, next_check_at
            "#,
        )
        .bind(remote_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to upsert subreddit: {e}")))?;

        Self::map_row(&row)
    }
}
