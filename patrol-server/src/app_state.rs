//! Wires `Config` into the shared handles every subcommand needs: the
//! Postgres pool, the two Redis roles (locks, dedup/queue), the upstream
//! and push clients, and the six named work queues.

use std::sync::Arc;

use patrol_core::dedup::{DedupClient, DedupStore};
use patrol_core::lock::LockClient;
use patrol_core::push::{ApnsClient, ApnsSigningKey};
use patrol_core::queue::Queue;
use patrol_core::store::PostgresStore;
use patrol_core::telemetry::{Metrics, TracingMetrics};
use patrol_core::upstream::{ReqwestUpstreamClient, UpstreamClient};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: PostgresStore,
    pub locks: LockClient,
    pub dedup: Arc<dyn DedupClient>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub push: Arc<dyn ApnsClientLike>,
    pub metrics: Arc<dyn Metrics>,
    pub push_topic: Arc<str>,
    pub subreddits_queue: Queue,
    pub users_queue: Queue,
    pub trending_queue: Queue,
    pub notifications_queue: Queue,
    pub stuck_notifications_queue: Queue,
    pub live_activities_queue: Queue,
}

/// Alias so `AppState` can hold the push client as a trait object without
/// importing `PushClient` into every call site that just wants `AppState`.
pub use patrol_core::push::PushClient as ApnsClientLike;

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        let store = PostgresStore::new(pool);

        let locks = LockClient::new(&config.redis_locks_url).await?;

        let dedup_client = redis::Client::open(config.redis_queue_url.as_str())?;
        let dedup_conn = redis::aio::ConnectionManager::new(dedup_client).await?;
        let dedup: Arc<dyn DedupClient> = Arc::new(DedupStore::new(dedup_conn));

        let metrics: Arc<dyn Metrics> = Arc::new(TracingMetrics);

        let upstream: Arc<dyn UpstreamClient> = Arc::new(ReqwestUpstreamClient::new(
            config.reddit_base_url.clone(),
            config.reddit_client_id.clone(),
            config.reddit_client_secret.clone(),
            metrics.clone(),
        )?);

        let apple_key_pem = std::fs::read(&config.apple_key_path)?;
        let signing_key = ApnsSigningKey::from_pem(&apple_key_pem, config.apple_key_id.clone(), config.apple_team_id.clone())?;
        let push: Arc<dyn ApnsClientLike> = Arc::new(ApnsClient::new(signing_key)?);

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            locks,
            dedup,
            upstream,
            push,
            metrics,
            push_topic: Arc::from(config.apple_bundle_id.as_str()),
            subreddits_queue: Queue::new("subreddits"),
            users_queue: Queue::new("users"),
            trending_queue: Queue::new("trending"),
            notifications_queue: Queue::new("notifications"),
            stuck_notifications_queue: Queue::new("stuck-notifications"),
            live_activities_queue: Queue::new("live-activities"),
        })
    }

    pub fn worker_context(&self) -> patrol_core::worker::WorkerContext {
        patrol_core::worker::WorkerContext {
            store: self.store.clone(),
            locks: Arc::new(self.locks.clone()),
            upstream: self.upstream.clone(),
            push: self.push.clone(),
            metrics: self.metrics.clone(),
            push_topic: self.push_topic.clone(),
            dedup: self.dedup.clone(),
        }
    }

    pub fn scheduler(&self) -> patrol_core::scheduler::Scheduler {
        patrol_core::scheduler::Scheduler {
            store: self.store.clone(),
            locks: self.locks.clone(),
            metrics: self.metrics.clone(),
            subreddits_queue: self.subreddits_queue.clone(),
            users_queue: self.users_queue.clone(),
            trending_queue: self.trending_queue.clone(),
            notifications_queue: self.notifications_queue.clone(),
            stuck_notifications_queue: self.stuck_notifications_queue.clone(),
            live_activities_queue: self.live_activities_queue.clone(),
        }
    }

    pub fn queue_by_name(&self, name: &str) -> Option<Queue> {
        match name {
            "subreddits" => Some(self.subreddits_queue.clone()),
            "users" => Some(self.users_queue.clone()),
            "trending" => Some(self.trending_queue.clone()),
            "notifications" => Some(self.notifications_queue.clone()),
            "stuck-notifications" => Some(self.stuck_notifications_queue.clone()),
            "live-activities" => Some(self.live_activities_queue.clone()),
            _ => None,
        }
    }
}
