use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{CoreError, Result};
use crate::model::{Device, DeviceAccountLink};
use crate::store::ports::DeviceRepository;

#[derive(Debug, Clone)]
pub struct PostgresDeviceRepository {
    pool: PgPool,
}

impl PostgresDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_device(row: &PgRow) -> Result<Device> {
        Ok(Device {
            id: row
                .try_get("id")
                .map_err(|e| CoreError::Internal(format!("failed to read device id: {e}")))?,
            apns_token: row
                .try_get("apns_token")
                .map_err(|e| CoreError::Internal(format!("failed to read apns_token: {e}")))?,
            sandbox: row
                .try_get("sandbox")
                .map_err(|e| CoreError::Internal(format!("failed to read sandbox: {e}")))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| CoreError::Internal(format!("failed to read expires_at: {e}")))?,
            grace_period_expires_at: row.try_get("grace_period_expires_at").map_err(|e| {
                CoreError::Internal(format!("failed to read grace_period_expires_at: {e}"))
            })?,
        })
    }

    fn map_link(row: &PgRow) -> Result<DeviceAccountLink> {
        Ok(DeviceAccountLink {
            device_id: row
                .try_get("device_id")
                .map_err(|e| CoreError::Internal(format!("failed to read device_id: {e}")))?,
            account_id: row
                .try_get("account_id")
                .map_err(|e| CoreError::Internal(format!("failed to read account_id: {e}")))?,
            inbox_notifiable: row
                .try_get("inbox_notifiable")
                .map_err(|e| CoreError::Internal(format!("failed to read inbox_notifiable: {e}")))?,
            watcher_notifiable: row.try_get("watcher_notifiable").map_err(|e| {
                CoreError::Internal(format!("failed to read watcher_notifiable: {e}"))
            })?,
            global_mute: row
                .try_get("global_mute")
                .map_err(|e| CoreError::Internal(format!("failed to read global_mute: {e}")))?,
        })
    }
}

#[async_trait]
impl DeviceRepository for PostgresDeviceRepository {
    async fn get(&self, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query(
            "SELECT id, apns_token, sandbox, expires_at, grace_period_expires_at \
             FROM devices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to load device {id}: {e}")))?;

        row.map(|r| Self::map_device(&r)).transpose()
    }

    async fn get_link(&self, device_id: i64, account_id: i64) -> Result<Option<DeviceAccountLink>> {
        let row = sqlx::query(
            "SELECT device_id, account_id, inbox_notifiable, watcher_notifiable, global_mute \
             FROM device_accounts WHERE device_id = $1 AND account_id = $2",
        )
        .bind(device_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to load device/account link: {e}")))?;

        row.map(|r| Self::map_link(&r)).transpose()
    }

    async fn list_inbox_notifiable(&self, account_id: i64) -> Result<Vec<Device>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            SELECT devices.id, devices.apns_token, devices.sandbox, devices.expires_at,
                   devices.grace_period_expires_at
            FROM devices
            JOIN device_accounts ON device_accounts.device_id = devices.id
            WHERE device_accounts.account_id = $1
              AND device_accounts.inbox_notifiable = TRUE
              AND device_accounts.global_mute = FALSE
              AND devices.grace_period_expires_at > $2
            "#,
        )
        .bind(account_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to list notifiable devices: {e}")))?;

        rows.iter().map(Self::map_device).collect()
    }

    async fn prune_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "DELETE FROM devices WHERE expires_at < $1 AND grace_period_expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to prune expired devices: {e}")))?;

        Ok(result.rows_affected())
    }
}
