//! The worker pipeline: one module per queue category, sharing the common
//! skeleton from §4.3. `run_consumer` is the single entry point every
//! `patrol worker --queue <name>` binds to; it wires `Queue::consume` to a
//! category handler and the Ack/Reject/lock-release bookkeeping common to
//! all six.

mod live_activities;
mod notifications;
mod stuck_notifications;
mod subreddits;
mod trending;
mod users;

pub use live_activities::handle_live_activity;
pub use notifications::handle_notification;
pub use stuck_notifications::handle_stuck_notification;
pub use subreddits::handle_subreddit;
pub use trending::handle_trending;
pub use users::handle_user;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::warn;

use crate::dedup::DedupClient;
use crate::error::Result;
use crate::lock::WorkerLock;
use crate::push::PushClient;
use crate::store::PostgresStore;
use crate::telemetry::Metrics;
use crate::upstream::{Credentials, RefreshedTokens, UpstreamClient, UpstreamError};

/// Shared worker-process context: everything a category handler needs to
/// reach the store, the upstream API, the push provider, and the lock it
/// must release on every exit path.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: PostgresStore,
    /// Only the `ttl_remaining`/`release_simple` subset `run_consumer` needs
    /// (selection's `acquire_many` stays on the scheduler's own `LockClient`).
    pub locks: Arc<dyn WorkerLock>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub push: Arc<dyn PushClient>,
    pub metrics: Arc<dyn Metrics>,
    /// The app's bundle id, used as `Notification::topic` for alert/
    /// background pushes (`APPLE_BUNDLE_ID`). Live-activity pushes suffix
    /// it with `.push-type.liveactivity` at the call site.
    pub push_topic: Arc<str>,
    /// The watcher/trending dedup keys (§6). Separate from `locks` because
    /// it addresses a different Redis role (`REDIS_QUEUE_URL`'s database,
    /// not the locks one) in multi-instance deployments.
    pub dedup: Arc<dyn DedupClient>,
}

/// Outcome a category handler returns; `run_consumer` translates it into
/// `Ack`/`Reject` on the queue (§4.3 step 7).
pub enum Outcome {
    Ack,
    Reject,
}

const CREDENTIAL_REFRESH_HORIZON: ChronoDuration = ChronoDuration::minutes(5);

/// §4.3 step 5: refresh an authenticated account's tokens if they expire
/// inside the horizon. Returns fresh credentials for this tick's upstream
/// calls and, when a refresh happened, the raw result for the caller to
/// persist (each entity persists to a different table/column set, so the
/// write itself is left to the caller rather than done here). `OAuthRevoked`
/// propagates to the caller, which treats the owning entity as terminal.
pub async fn maybe_refresh(
    ctx: &WorkerContext,
    creds: Credentials,
    token_expires_at: chrono::DateTime<chrono::Utc>,
) -> std::result::Result<(Credentials, Option<RefreshedTokens>), UpstreamError> {
    let now = chrono::Utc::now();
    if token_expires_at - now >= CREDENTIAL_REFRESH_HORIZON {
        return Ok((creds, None));
    }

    let refreshed = ctx.upstream.refresh_tokens(&creds).await?;
    let fresh_creds = Credentials {
        remote_account_id: creds.remote_account_id,
        access_token: refreshed.access_token.clone(),
        refresh_token: refreshed.refresh_token.clone(),
    };

    Ok((fresh_creds, Some(refreshed)))
}

/// Releases `locks:<prefix>:<id>` unconditionally (§4.3 step 3, "DEL
/// lock_key" — no uid to check, see `LockClient::release_simple`). Called
/// on every exit path of `run_consumer`, success or failure.
async fn release_lock(locks: &dyn WorkerLock, prefix: &str, id: &str) {
    if let Err(e) = locks.release_simple(prefix, id).await {
        warn!(prefix, id, error = %e, "failed to release dedup lock");
    }
}

/// Runs `consumers` tasks against `queue`, each delegating to `handle` for
/// one delivery and applying the shared skeleton: latency measurement,
/// deferred lock release, and Ack/Reject translation.
pub fn run_consumer<H, Fut>(
    queue: crate::queue::Queue,
    consumers: usize,
    lock_prefix: &'static str,
    ctx: WorkerContext,
    handle: H,
) -> crate::queue::ConsumerPool
where
    H: Fn(WorkerContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Outcome> + Send + 'static,
{
    let handle = Arc::new(handle);
    let ack_queue = queue.clone();

    crate::queue::ConsumerPool::spawn(queue, consumers, move |delivery| {
        let ctx = ctx.clone();
        let handle = handle.clone();
        let queue = ack_queue.clone();
        async move {
            let id = delivery.payload.clone();

            let outcome = handle(ctx.clone(), id.clone()).await;

            let lock_key_prefix = format!("locks:{lock_prefix}");
            let remaining_ttl = ctx
                .locks
                .ttl_remaining(&lock_key_prefix, &id)
                .await
                .ok()
                .flatten()
                .unwrap_or(Duration::ZERO);
            let queue_latency = CHECK_TIMEOUT.saturating_sub(remaining_ttl);
            ctx.metrics.histogram("patrol.worker.latency_ms", queue_latency, &[("queue", lock_prefix)]);

            release_lock(ctx.locks.as_ref(), &lock_key_prefix, &id).await;

            match outcome {
                Outcome::Ack => queue.ack(delivery.tag).await,
                Outcome::Reject => queue.reject(delivery.tag).await,
            }
        }
    })
}

pub(crate) fn retryable_to_outcome(err: &UpstreamError) -> Outcome {
    if err.is_retryable() {
        Outcome::Reject
    } else {
        Outcome::Ack
    }
}

/// Every category's scheduler-side lock shares this TTL (`CategoryTuning`),
/// so queue latency (§4.3 step 2) is measured the same way for all of them:
/// `CheckTimeout - TTL(lock_key)`, the age since the scheduler claimed it.
pub(crate) const CHECK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
