//! The three maintenance jobs that aren't entity selection: the queue
//! cleaner, the row-count reporter, and the stale-row pruners (§4.1
//! "Maintenance tasks").

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use super::Scheduler;

const QUEUE_CLEANER_TICK: Duration = Duration::from_secs(5);
const REPORTER_TICK: Duration = Duration::from_secs(60);
const STALE_TOKEN_THRESHOLD: chrono::Duration = chrono::Duration::hours(2);

pub async fn run_maintenance(scheduler: std::sync::Arc<Scheduler>) {
    let cleaner = tokio::spawn(run_queue_cleaner(scheduler.clone()));
    let reporter = tokio::spawn(run_reporter(scheduler.clone()));
    let pruner = tokio::spawn(run_pruners(scheduler));

    let _ = tokio::join!(cleaner, reporter, pruner);
}

/// Returns deliveries whose consumer died mid-processing (unacked past the
/// per-category lock TTL) to each queue's ready list.
async fn run_queue_cleaner(scheduler: std::sync::Arc<Scheduler>) {
    let mut ticker = interval(QUEUE_CLEANER_TICK);
    let threshold = Duration::from_secs(5 * 60);

    let queues = [
        &scheduler.notifications_queue,
        &scheduler.subreddits_queue,
        &scheduler.trending_queue,
        &scheduler.users_queue,
        &scheduler.stuck_notifications_queue,
        &scheduler.live_activities_queue,
    ];

    loop {
        ticker.tick().await;
        for queue in queues {
            let reaped = queue.reap_stuck(threshold).await;
            if reaped > 0 {
                info!(queue = queue.name(), reaped, "queue cleaner reaped stuck deliveries");
            }
        }
    }
}

async fn run_reporter(scheduler: std::sync::Arc<Scheduler>) {
    let mut ticker = interval(REPORTER_TICK);
    loop {
        ticker.tick().await;
        match scheduler.store.table_row_counts().await {
            Ok(counts) => {
                for (table, count) in counts {
                    scheduler.metrics.gauge("patrol.rows", count, &[("table", table)]);
                }
            }
            Err(e) => error!(error = %e, "reporter failed to read row counts"),
        }
    }
}

const PRUNER_LOCK_KEY: &str = "locks:maintenance:pruners";
const PRUNER_LOCK_TTL: Duration = Duration::from_secs(55);

/// Deletes accounts past `StaleTokenThreshold` (or with no device links at
/// all) and devices past their grace period.
///
/// Unlike the per-category selection jobs, a redundant pruner sweep buys
/// nothing (every replica issues the same idempotent `DELETE`s against the
/// same rows) and only adds load, so each tick claims a named lock first and
/// skips entirely if another scheduler replica already holds it.
async fn run_pruners(scheduler: std::sync::Arc<Scheduler>) {
    let mut ticker = interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;

        let lock = match scheduler.locks.acquire(PRUNER_LOCK_KEY, PRUNER_LOCK_TTL).await {
            Ok(Some(lock)) => lock,
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "pruner lock acquisition failed");
                continue;
            }
        };

        match scheduler.store.accounts.prune_stale(STALE_TOKEN_THRESHOLD).await {
            Ok(removed) if removed > 0 => info!(removed, "pruned stale accounts"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "account pruner failed"),
        }

        match scheduler.store.devices.prune_expired().await {
            Ok(removed) if removed > 0 => info!(removed, "pruned expired devices"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "device pruner failed"),
        }

        if let Err(e) = scheduler.locks.release(&lock).await {
            error!(error = %e, "failed to release pruner lock");
        }
    }
}
