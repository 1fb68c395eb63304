//! Cluster-level distributed lock: `SETNX key uid TTL`, released by an
//! atomic compare-and-delete script so a handler never releases a lock it
//! no longer owns. Row-level claiming lives in `store`; this is the
//! cross-process half of the "at-most-one-check-in-flight" guarantee.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// The slice of lock operations a worker pipeline needs once it already
/// holds its dedup lock: read the remaining TTL for the latency gauge, then
/// release unconditionally (§4.3 steps 2-3). A trait, separate from
/// [`LockClient`] itself, so handler-level tests can fake it without a real
/// Redis connection — mirrors `DedupClient`/`UpstreamClient`/`PushClient`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkerLock: Send + Sync {
    async fn ttl_remaining(&self, prefix: &str, id: &str) -> Result<Option<StdDuration>>;
    async fn release_simple(&self, prefix: &str, id: &str) -> Result<()>;
}

fn pubsub_channel(key: &str) -> String {
    format!("pubsub:locks:{key}")
}

/// Atomic scripts backing the lock. Pre-loaded once per process and
/// invoked by content hash on every call (`redis::Script` handles the
/// `EVALSHA`/`EVAL` fallback internally).
mod scripts {
    use redis::Script;

    /// `GET key == uid ? (DEL key; PUBLISH chan key) : nil`. Returns 1 if
    /// this caller held the lock and it was released, 0 otherwise.
    pub fn release() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local chan = KEYS[2]
            local uid = ARGV[1]

            if redis.call('GET', key) == uid then
                redis.call('DEL', key)
                redis.call('PUBLISH', chan, key)
                return 1
            else
                return 0
            end
            "#,
        )
    }

    /// Scheduler-side dedup lock: `SETNX locks:<prefix>:<id> 1 PX ttl` for
    /// each candidate id in one round trip. Returns the subset of ids this
    /// call actually claimed; callers skip the rest. No uid/ownership here —
    /// the worker's own release is an unconditional `DEL` (§4.3 step 3), so
    /// there is nothing to compare against on the way out.
    pub fn acquire_many() -> Script {
        Script::new(
            r#"
            local prefix = ARGV[1]
            local ttl = tonumber(ARGV[2])
            local claimed = {}

            for i = 3, #ARGV do
                local id = ARGV[i]
                local key = prefix .. ':' .. id
                if redis.call('SET', key, '1', 'NX', 'PX', ttl) then
                    table.insert(claimed, id)
                end
            end

            return claimed
            "#,
        )
    }
}

/// A held lock. Dropping this without calling [`Lock::release`] leaves the
/// key to expire on its own TTL — release is always attempted by callers
/// in a deferred step regardless of the outcome of the guarded work.
#[derive(Debug, Clone)]
pub struct Lock {
    pub key: String,
    pub uid: String,
}

/// Talks to the `locks:*` Redis instance (`REDIS_LOCKS_URL`, possibly the
/// same as the queue/cache one). Keeps both a multiplexed
/// [`ConnectionManager`] for the hot SETNX/script path and the originating
/// [`redis::Client`] for the occasional dedicated pub/sub connection that
/// [`LockClient::wait_acquire`] needs.
#[derive(Debug, Clone)]
pub struct LockClient {
    client: redis::Client,
    conn: ConnectionManager,
    release_script: Script,
    acquire_many_script: Script,
}

impl LockClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(CoreError::Redis)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(CoreError::Redis)?;

        Ok(Self {
            client,
            conn,
            release_script: scripts::release(),
            acquire_many_script: scripts::acquire_many(),
        })
    }

    /// Batched dedup-lock claim for one scheduler tick's candidate set.
    /// `prefix` is e.g. `locks:subreddits`; returns the ids actually
    /// claimed, in no particular order.
    pub async fn acquire_many(
        &self,
        prefix: &str,
        ids: &[String],
        ttl: StdDuration,
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let mut invocation = self.acquire_many_script.prepare_invoke();
        invocation.arg(prefix).arg(ttl.as_millis() as i64);
        for id in ids {
            invocation.arg(id);
        }

        invocation.invoke_async(&mut conn).await.map_err(CoreError::Redis)
    }

    /// Unconditional `DEL locks:<prefix>:<id>`, the worker-side release for
    /// a batch-acquired dedup lock (no uid to check, see `acquire_many`).
    pub async fn release_simple(&self, prefix: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = format!("{prefix}:{id}");
        redis::cmd("DEL").arg(&key).query_async::<()>(&mut conn).await.map_err(CoreError::Redis)?;
        Ok(())
    }

    /// Remaining TTL on `key`, read via `PTTL` before release. `None` when
    /// the key is already gone (expired, or already reclaimed) — callers
    /// treat that as "no time was left", i.e. maximal age.
    pub async fn ttl_remaining(&self, prefix: &str, id: &str) -> Result<Option<StdDuration>> {
        let mut conn = self.conn.clone();
        let key = format!("{prefix}:{id}");
        let pttl: i64 = redis::cmd("PTTL").arg(&key).query_async(&mut conn).await.map_err(CoreError::Redis)?;
        if pttl < 0 {
            Ok(None)
        } else {
            Ok(Some(StdDuration::from_millis(pttl as u64)))
        }
    }

    /// One-shot `SETNX key uid TTL`. Returns `Ok(None)` (not an error) when
    /// another holder already owns the key — callers treat that as "skip
    /// this candidate silently" per the dedup-lock semantics.
    pub async fn acquire(&self, key: &str, ttl: StdDuration) -> Result<Option<Lock>> {
        let uid = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&uid)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as i64)
            .query_async(&mut conn)
            .await
            .map_err(CoreError::Redis)?;

        Ok(set.map(|_| Lock {
            key: key.to_string(),
            uid,
        }))
    }

    /// Try once; if taken, subscribe to the lock's pub/sub channel and
    /// retry exactly once on publish or on `wait_timeout` elapsing.
    pub async fn wait_acquire(
        &self,
        key: &str,
        ttl: StdDuration,
        wait_timeout: StdDuration,
    ) -> Result<Option<Lock>> {
        if let Some(lock) = self.acquire(key, ttl).await? {
            return Ok(Some(lock));
        }

        let channel = pubsub_channel(key);
        let _ = timeout(wait_timeout, self.block_for_publish(&channel)).await;

        self.acquire(key, ttl).await
    }

    async fn block_for_publish(&self, channel: &str) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(CoreError::Redis)?;
        pubsub.subscribe(channel).await.map_err(CoreError::Redis)?;
        pubsub.on_message().next().await;
        Ok(())
    }

    /// `Release(key, uid)`. Returns `Err(LockExpired)` when the caller no
    /// longer owns the key (already reclaimed by TTL expiry or stolen).
    pub async fn release(&self, lock: &Lock) -> Result<()> {
        let mut conn = self.conn.clone();
        let channel = pubsub_channel(&lock.key);

        let released: i64 = self
            .release_script
            .key(&lock.key)
            .key(&channel)
            .arg(&lock.uid)
            .invoke_async(&mut conn)
            .await
            .map_err(CoreError::Redis)?;

        if released == 1 {
            Ok(())
        } else {
            Err(CoreError::LockExpired(lock.key.clone()))
        }
    }
}

#[async_trait]
impl WorkerLock for LockClient {
    async fn ttl_remaining(&self, prefix: &str, id: &str) -> Result<Option<StdDuration>> {
        self.ttl_remaining(prefix, id).await
    }

    async fn release_simple(&self, prefix: &str, id: &str) -> Result<()> {
        self.release_simple(prefix, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubsub_channel_matches_kv_key_naming() {
        assert_eq!(pubsub_channel("locks:subreddits:42"), "pubsub:locks:locks:subreddits:42");
    }
}
