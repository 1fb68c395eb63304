use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CoreError, Result};
use crate::model::LiveActivity;
use crate::store::ports::LiveActivityRepository;

#[derive(Debug, Clone)]
pub struct PostgresLiveActivityRepository {
    pool: PgPool,
}

impl PostgresLiveActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<LiveActivity> {
        Ok(LiveActivity {
            apns_token: row
                .try_get("apns_token")
                .map_err(|e| CoreError::Internal(format!("failed to read apns_token: {e}")))?,
            remote_account_id: row
                .try_get("remote_account_id")
                .map_err(|e| CoreError::Internal(format!("failed to read remote_account_id: {e}")))?,
            access_token: row
                .try_get("access_token")
                .map_err(|e| CoreError::Internal(format!("failed to read access_token: {e}")))?,
            refresh_token: row
                .try_get("refresh_token")
                .map_err(|e| CoreError::Internal(format!("failed to read refresh_token: {e}")))?,
            token_expires_at: row
                .try_get("token_expires_at")
                .map_err(|e| CoreError::Internal(format!("failed to read token_expires_at: {e}")))?,
            thread_id: row
                .try_get("thread_id")
                .map_err(|e| CoreError::Internal(format!("failed to read thread_id: {e}")))?,
            subreddit: row
                .try_get("subreddit")
                .map_err(|e| CoreError::Internal(format!("failed to read subreddit: {e}")))?,
            next_check_at: row
                .try_get("next_check_at")
                .map_err(|e| CoreError::Internal(format!("failed to read next_check_at: {e}")))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| CoreError::Internal(format!("failed to read expires_at: {e}")))?,
        })
    }

    const COLUMNS: &'static str = "apns_token, remote_account_id, access_token, refresh_token, \
        token_expires_at, thread_id, subreddit, next_check_at, expires_at";
}

#[async_trait]
impl LiveActivityRepository for PostgresLiveActivityRepository {
    async fn get(&self, apns_token: &str) -> Result<Option<LiveActivity>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM live_activities WHERE apns_token = $1",
            Self::COLUMNS
        ))
        .bind(apns_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to load live activity: {e}")))?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    async fn select_due(&self, limit: i64, interval: Duration) -> Result<Vec<String>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT apns_token FROM live_activities
                WHERE next_check_at < $1
                  AND expires_at > $1
                ORDER BY next_check_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE live_activities
            SET next_check_at = $1 + $3 * INTERVAL '1 second'
            FROM due
            WHERE live_activities.apns_token = due.apns_token
            RETURNING live_activities.apns_token
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(interval.num_seconds())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to select due live activities: {e}")))?;

        rows.into_iter()
            .map(|r| {
                r.try_get::<String, _>("apns_token")
                    .map_err(|e| CoreError::Internal(format!("failed to read apns_token: {e}")))
            })
            .collect()
    }

    async fn update_tokens(
        &self,
        apns_token: &str,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE live_activities SET access_token = $2, refresh_token = $3, \
             token_expires_at = $4 WHERE apns_token = $1",
        )
        .bind(apns_token)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to update live activity tokens: {e}")))?;

        Ok(())
    }

    async fn delete(&self, apns_token: &str) -> Result<()> {
        sqlx::query("DELETE FROM live_activities WHERE apns_token = $1")
            .bind(apns_token)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to delete live activity: {e}")))?;

        Ok(())
    }
}
