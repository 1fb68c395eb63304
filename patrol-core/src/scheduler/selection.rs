//! The per-category dedup-lock-then-publish step shared by every job
//! except `notifications` (§4.1 "dedup lock" + §8 invariant 1,
//! at-most-one-in-flight): claim the subset of already-selected IDs whose
//! lock key didn't exist, publish only those.

use std::time::Duration;

use crate::error::Result;
use crate::lock::LockClient;
use crate::queue::Queue;

/// `ids` are decimal primary keys (subreddits, users, stuck-notifications).
pub async fn select_and_lock(
    locks: &LockClient,
    queue: &Queue,
    prefix: &str,
    ids: Vec<i64>,
    ttl: Duration,
) -> Result<()> {
    let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
    select_and_lock_raw(locks, queue, prefix, ids, ttl).await
}

/// Same, but for categories whose payload is already a string (hex APNs
/// token for `live-activities`).
pub async fn select_and_lock_raw(
    locks: &LockClient,
    queue: &Queue,
    prefix: &str,
    ids: Vec<String>,
    ttl: Duration,
) -> Result<()> {
    let claimed = locks.acquire_many(prefix, &ids, ttl).await?;
    for id in claimed {
        queue.publish(id).await;
    }
    Ok(())
}

/// Subreddits are dedup-locked once under `locks:subreddits:<id>` but drive
/// two independent workers (the plain subreddit check and the trending
/// check share the same candidate set and the same lock — there is no
/// separate `locks:trending:*` key, see §6 KV keys). Claimed ids are
/// published to both queues.
pub async fn select_and_lock_fanout(
    locks: &LockClient,
    queues: &[&Queue],
    prefix: &str,
    ids: Vec<i64>,
    ttl: Duration,
) -> Result<()> {
    let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
    let claimed = locks.acquire_many(prefix, &ids, ttl).await?;
    for id in &claimed {
        for queue in queues {
            queue.publish(id.clone()).await;
        }
    }
    Ok(())
}
