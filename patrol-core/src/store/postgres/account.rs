use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CoreError, Result};
use crate::model::Account;
use crate::store::ports::AccountRepository;

#[derive(Debug, Clone)]
pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Account> {
        Ok(Account {
            id: row
                .try_get("id")
                .map_err(|e| CoreError::Internal(format!("failed to read account id: {e}")))?,
            remote_id: row
                .try_get("remote_id")
                .map_err(|e| CoreError::Internal(format!("failed to read remote_id: {e}")))?,
            username: row
                .try_get("username")
                .map_err(|e| CoreError::Internal(format!("failed to read username: {e}")))?,
            access_token: row
                .try_get("access_token")
                .map_err(|e| CoreError::Internal(format!("failed to read access_token: {e}")))?,
            refresh_token: row
                .try_get("refresh_token")
                .map_err(|e| CoreError::Internal(format!("failed to read refresh_token: {e}")))?,
            token_expires_at: row
                .try_get("token_expires_at")
                .map_err(|e| CoreError::Internal(format!("failed to read token_expires_at: {e}")))?,
            last_message_id: row
                .try_get("last_message_id")
                .map_err(|e| CoreError::Internal(format!("failed to read last_message_id: {e}")))?,
            next_notification_check_at: row.try_get("next_notification_check_at").map_err(|e| {
                CoreError::Internal(format!("failed to read next_notification_check_at: {e}"))
            })?,
            next_stuck_notification_check_at: row
                .try_get("next_stuck_notification_check_at")
                .map_err(|e| {
                    CoreError::Internal(format!(
                        "failed to read next_stuck_notification_check_at: {e}"
                    ))
                })?,
            check_count: row
                .try_get("check_count")
                .map_err(|e| CoreError::Internal(format!("failed to read check_count: {e}")))?,
        })
    }

    const COLUMNS: &'static str = "id, remote_id, username, access_token, refresh_token, \
        token_expires_at, last_message_id, next_notification_check_at, \
        next_stuck_notification_check_at, check_count";
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn get(&self, id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", Self::COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to load account {id}: {e}")))?;

        row.map(|r| Self::map_row(&r)).transpose()
    }

    async fn list_fanout_candidates(&self) -> Result<Vec<i64>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT accounts.id
            FROM accounts
            JOIN device_accounts ON device_accounts.account_id = accounts.id
            JOIN devices ON devices.id = device_accounts.device_id
            WHERE devices.grace_period_expires_at > $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to list fan-out candidates: {e}")))?;

        rows.into_iter()
            .map(|r| {
                r.try_get::<i64, _>("id")
                    .map_err(|e| CoreError::Internal(format!("failed to read account id: {e}")))
            })
            .collect()
    }

    async fn touch_notification_clock(&self, id: i64, next_check_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE accounts SET next_notification_check_at = $2 WHERE id = $1")
            .bind(id)
            .bind(next_check_at)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to touch notification clock: {e}")))?;

        Ok(())
    }

    async fn select_stuck_candidates(&self, limit: i64, interval: Duration) -> Result<Vec<i64>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id FROM accounts
                WHERE next_stuck_notification_check_at < $1
                ORDER BY next_stuck_notification_check_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE accounts
            SET next_stuck_notification_check_at = $1 + $3 * INTERVAL '1 second'
            FROM due
            WHERE accounts.id = due.id
            RETURNING accounts.id
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(interval.num_seconds())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to select stuck candidates: {e}")))?;

        rows.into_iter()
            .map(|r| {
                r.try_get::<i64, _>("id")
                    .map_err(|e| CoreError::Internal(format!("failed to read account id: {e}")))
            })
            .collect()
    }

    async fn update_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET access_token = $2, refresh_token = $3, token_expires_at = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to update account tokens: {e}")))?;

        Ok(())
    }

    async fn update_watermark(&self, id: i64, last_message_id: &str) -> Result<()> {
        sqlx::query("UPDATE accounts SET last_message_id = $2 WHERE id = $1")
            .bind(id)
            .bind(last_message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to update watermark: {e}")))?;

        Ok(())
    }

    async fn touch_last_checked(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET check_count = check_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to touch last checked: {e}")))?;

        Ok(())
    }

    async fn prune_stale(&self, stale_token_threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - stale_token_threshold;
        let result = sqlx::query(
            r#"
            DELETE FROM accounts
            WHERE token_expires_at < $1
               OR id NOT IN (SELECT account_id FROM device_accounts)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to prune stale accounts: {e}")))?;

        Ok(result.rows_affected())
    }
}
