//! The scheduler process: one time-driven dispatcher per work category,
//! producing batches of dedup-locked entity IDs and publishing them to the
//! matching queue. See §4.1 for the tick cadence and selection protocol
//! this module implements job-by-job.

mod accounts_fanout;
mod maintenance;
mod selection;

pub use accounts_fanout::run_notifications_fanout;
pub use maintenance::run_maintenance;
pub use selection::{select_and_lock, select_and_lock_fanout};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::time::interval;
use tracing::{error, info};

use crate::lock::LockClient;
use crate::queue::Queue;
use crate::store::PostgresStore;
use crate::telemetry::Metrics;

/// Selection limits and intervals, §4.1. Hardcoded as the spec's
/// recommended defaults; nothing here is tunable per-deployment today.
pub struct CategoryTuning {
    pub limit: i64,
    pub interval: ChronoDuration,
    pub lock_ttl: Duration,
    pub tick: Duration,
}

impl CategoryTuning {
    pub fn subreddits() -> Self {
        Self {
            limit: 100,
            interval: ChronoDuration::seconds(5),
            lock_ttl: Duration::from_secs(5 * 60),
            tick: Duration::from_secs(5),
        }
    }

    pub fn users() -> Self {
        Self {
            limit: 100,
            interval: ChronoDuration::minutes(2),
            lock_ttl: Duration::from_secs(5 * 60),
            tick: Duration::from_secs(5),
        }
    }

    pub fn stuck_notifications() -> Self {
        Self {
            limit: 500,
            interval: ChronoDuration::minutes(2),
            lock_ttl: Duration::from_secs(5 * 60),
            tick: Duration::from_secs(5),
        }
    }

    pub fn live_activities() -> Self {
        Self {
            limit: 1000,
            interval: ChronoDuration::seconds(30),
            lock_ttl: Duration::from_secs(5 * 60),
            tick: Duration::from_secs(5),
        }
    }

    /// Notifications doesn't use the generic `select_and_lock` path (see
    /// `accounts_fanout`), but shares the same lock TTL / check interval.
    pub fn notifications() -> Self {
        Self {
            limit: 500,
            interval: ChronoDuration::seconds(10),
            lock_ttl: Duration::from_secs(5 * 60),
            tick: Duration::from_secs(5),
        }
    }
}

/// Everything a scheduler job needs: the store, the lock client, and the
/// set of per-category queues workers consume from.
#[derive(Clone)]
pub struct Scheduler {
    pub store: PostgresStore,
    pub locks: LockClient,
    pub metrics: Arc<dyn Metrics>,
    pub subreddits_queue: Queue,
    pub users_queue: Queue,
    pub trending_queue: Queue,
    pub notifications_queue: Queue,
    pub stuck_notifications_queue: Queue,
    pub live_activities_queue: Queue,
}

impl Scheduler {
    /// Spawns one task per job (§4.1 tick cadence) and returns immediately;
    /// callers hold the returned handles to await/abort on shutdown.
    pub fn spawn_jobs(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(run_notifications_job(self.clone())));
        handles.push(tokio::spawn(run_category_job(
            self.clone(),
            "subreddits",
            CategoryTuning::subreddits(),
        )));
        handles.push(tokio::spawn(run_category_job(self.clone(), "users", CategoryTuning::users())));
        handles.push(tokio::spawn(run_category_job(
            self.clone(),
            "stuck-notifications",
            CategoryTuning::stuck_notifications(),
        )));
        handles.push(tokio::spawn(run_category_job(
            self.clone(),
            "live-activities",
            CategoryTuning::live_activities(),
        )));
        handles.push(tokio::spawn(run_maintenance(self.clone())));

        handles
    }
}

/// `notifications` is singleton (§4.1): a new tick while the prior fan-out
/// is still running is skipped rather than queued.
async fn run_notifications_job(scheduler: Arc<Scheduler>) {
    let tuning = CategoryTuning::notifications();
    let mut ticker = interval(tuning.tick);
    let running = Arc::new(AtomicBool::new(false));

    loop {
        ticker.tick().await;

        if running.swap(true, Ordering::SeqCst) {
            info!("notifications tick skipped, prior fan-out still running");
            continue;
        }

        let scheduler = scheduler.clone();
        let running = running.clone();
        tokio::spawn(async move {
            if let Err(e) = run_notifications_fanout(&scheduler, &tuning).await {
                error!(error = %e, "notifications fan-out failed");
            }
            running.store(false, Ordering::SeqCst);
        });
    }
}

async fn run_category_job(scheduler: Arc<Scheduler>, category: &'static str, tuning: CategoryTuning) {
    let mut ticker = interval(tuning.tick);
    loop {
        ticker.tick().await;
        if let Err(e) = run_one_category_tick(&scheduler, category, &tuning).await {
            error!(category, error = %e, "scheduler tick failed");
        }
    }
}

async fn run_one_category_tick(
    scheduler: &Scheduler,
    category: &'static str,
    tuning: &CategoryTuning,
) -> crate::error::Result<()> {
    match category {
        "subreddits" => {
            let ids = scheduler.store.subreddits.select_due(tuning.limit, tuning.interval).await?;
            select_and_lock_fanout(
                &scheduler.locks,
                &[&scheduler.subreddits_queue, &scheduler.trending_queue],
                "locks:subreddits",
                ids,
                tuning.lock_ttl,
            )
            .await
        }
        "users" => {
            let ids = scheduler.store.watched_users.select_due(tuning.limit, tuning.interval).await?;
            select_and_lock(&scheduler.locks, &scheduler.users_queue, "locks:users", ids, tuning.lock_ttl).await
        }
        "stuck-notifications" => {
            let ids = scheduler.store.accounts.select_stuck_candidates(tuning.limit, tuning.interval).await?;
            select_and_lock(
                &scheduler.locks,
                &scheduler.stuck_notifications_queue,
                "locks:stuck-notifications",
                ids,
                tuning.lock_ttl,
            )
            .await
        }
        "live-activities" => {
            let tokens = scheduler.store.live_activities.select_due(tuning.limit, tuning.interval).await?;
            select_and_lock_tokens(
                &scheduler.locks,
                &scheduler.live_activities_queue,
                "locks:live-activities",
                tokens,
                tuning.lock_ttl,
            )
            .await
        }
        _ => Ok(()),
    }
}

async fn select_and_lock_tokens(
    locks: &LockClient,
    queue: &Queue,
    prefix: &str,
    ids: Vec<String>,
    ttl: Duration,
) -> crate::error::Result<()> {
    selection::select_and_lock_raw(locks, queue, prefix, ids, ttl).await
}
