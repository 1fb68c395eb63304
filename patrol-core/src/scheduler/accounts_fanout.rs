//! The notifications enqueuer's accounts fan-out (§4.1): select every
//! active account once, partition into 60 equal-sized chunks, schedule
//! chunk `i`'s SETNX-and-publish at `now + i` seconds. Smooths the full
//! active-account set's re-poll across a minute instead of bursting it at
//! the tick boundary.

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::{CategoryTuning, Scheduler, select_and_lock};
use crate::error::Result;

const FANOUT_CHUNKS: usize = 60;

pub async fn run_notifications_fanout(scheduler: &Scheduler, tuning: &CategoryTuning) -> Result<()> {
    let candidates = scheduler.store.accounts.list_fanout_candidates().await?;
    if candidates.is_empty() {
        return Ok(());
    }

    let chunks = partition(candidates, FANOUT_CHUNKS);
    let now = chrono::Utc::now();

    for (i, chunk) in chunks.into_iter().enumerate() {
        if chunk.is_empty() {
            continue;
        }

        let scheduler = scheduler.clone_handles();
        let ttl = tuning.lock_ttl;
        let next_check_at = now + tuning.interval;

        tokio::spawn(async move {
            sleep(Duration::from_secs(i as u64)).await;

            for id in &chunk {
                if let Err(e) = scheduler.store.accounts.touch_notification_clock(*id, next_check_at).await {
                    warn!(account_id = id, error = %e, "failed to touch notification clock");
                }
            }

            if let Err(e) = select_and_lock(&scheduler.locks, &scheduler.notifications_queue, "locks:accounts", chunk, ttl).await
            {
                warn!(error = %e, chunk = i, "notifications fan-out chunk failed");
            }
        });
    }

    Ok(())
}

/// Splits `ids` into up to `n` chunks of near-equal size, preserving order
/// within each. Fewer than `n` chunks come back when `ids.len() < n`.
fn partition(ids: Vec<i64>, n: usize) -> Vec<Vec<i64>> {
    let len = ids.len();
    let base = len / n;
    let remainder = len % n;

    let mut chunks = Vec::with_capacity(n);
    let mut iter = ids.into_iter();
    for i in 0..n {
        let size = base + usize::from(i < remainder);
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

impl Scheduler {
    /// Cheap clone restricted to what a spawned fan-out chunk task needs;
    /// `Scheduler` itself is already `Clone` but this keeps call sites
    /// self-documenting about what crosses the task boundary.
    fn clone_handles(&self) -> Scheduler {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_distributes_remainder_across_leading_chunks() {
        let ids: Vec<i64> = (0..65).collect();
        let chunks = partition(ids, 60);
        assert_eq!(chunks.len(), 60);
        let total: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(total, 65);
        assert!(chunks[0].len() >= chunks[59].len());
    }

    #[test]
    fn partition_handles_fewer_ids_than_chunks() {
        let ids: Vec<i64> = (0..5).collect();
        let chunks = partition(ids, 60);
        assert_eq!(chunks.iter().filter(|c| !c.is_empty()).count(), 5);
    }
}
