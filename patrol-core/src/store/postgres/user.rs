use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CoreError, Result};
use crate::model::WatchedUser;
use crate::store::ports::WatchedUserRepository;

#[derive(Debug, Clone)]
pub struct PostgresWatchedUserRepository {
    pool: PgPool,
}

impl PostgresWatchedUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<WatchedUser> {
        Ok(WatchedUser {
            id: row
                .try_get("id")
                .map_err(|e| CoreError::Internal(format!("failed to read watched user id: {e}")))?,
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
impl WatchedUserRepository for PostgresWatchedUserRepository {
    async fn get(&self, id: i64) -> Result<Option<WatchedUser>> {
        let row = sqlx::query("SELECT id, remote_id, name, next_check_at FROM watched_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to load watched user {id}: {e}")))?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    async fn select_due(&self, limit: i64, interval: Duration) -> Result<Vec<i64>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id FROM watched_users
                WHERE next_check_at < $1
                ORDER BY next_check_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE watched_users
            SET next_check_at = $1 + $3 * INTERVAL '1 second'
            FROM due
            WHERE watched_users.id = due.id
            RETURNING watched_users.id
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(interval.num_seconds())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to select due watched users: {e}")))?;

        rows.into_iter()
            .map(|r| {
                r.try_get::<i64, _>("id")
                    .map_err(|e| CoreError::Internal(format!("failed to read watched user id: {e}")))
            })
            .collect()
    }

    async fn create_or_update(&self, remote_id: &str, name: &str) -> Result<WatchedUser> {
        let row = sqlx::query(
            r#"
            INSERT INTO watched_users (remote_id, name, next_check_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (remote_id) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, remote_id, name, next_check_at
            "#,
        )
        .bind(remote_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to upsert watched user: {e}")))?;

        Self::map_row(&row)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM watched_users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to delete watched user {id}: {e}")))?;

        Ok(())
    }
}
