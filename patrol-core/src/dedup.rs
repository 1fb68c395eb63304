//! Per-notification dedup keys: "has device D already been pushed about
//! post P" survives worker restarts and spans every process touching the
//! same Redis instance, unlike an in-memory seen-set.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
#[cfg(test)]
use mockall::automock;

use crate::error::{CoreError, Result};

const WATCHER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const TRENDING_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// The watcher/trending dedup surface workers reach through. A trait (rather
/// than handing out `DedupStore` directly) so handler-level tests can fake
/// dedup claims without a real Redis instance.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DedupClient: Send + Sync {
    async fn claim_watcher_notification(&self, device_id: i64, post_id: &str) -> Result<bool>;

    async fn claim_trending_notification(&self, device_id: i64, post_id: &str) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DedupStore {
    conn: ConnectionManager,
}

impl DedupStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(CoreError::Redis)?;

        Ok(set.is_some())
    }
}

#[async_trait]
impl DedupClient for DedupStore {
    /// Claims `watcher:<device_id>:<post_id>` for 24h. Returns `true` the
    /// first time it's claimed for a given (device, post) pair.
    async fn claim_watcher_notification(&self, device_id: i64, post_id: &str) -> Result<bool> {
        self.claim(&format!("watcher:{device_id}:{post_id}"), WATCHER_TTL)
            .await
    }

    /// Claims `watcher:trending:<device_id>:<post_id>` for 48h.
    async fn claim_trending_notification(&self, device_id: i64, post_id: &str) -> Result<bool> {
        self.claim(&format!("watcher:trending:{device_id}:{post_id}"), TRENDING_TTL)
            .await
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(CoreError::Redis)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttls_match_the_documented_windows() {
        assert_eq!(WATCHER_TTL, Duration::from_secs(86_400));
        assert_eq!(TRENDING_TTL, Duration::from_secs(172_800));
    }
}
