//! §4.3.2: per-subreddit watcher matching against freshly-fetched posts.

use std::collections::HashMap;

use chrono::Utc;
use tracing::warn;

use super::{Outcome, WorkerContext};
use crate::model::{Watcher, WatcherType};
use crate::push::{Notification, Priority, PushType, payload};
use crate::upstream::{ListingSort, Post};
use crate::watcher_match;

const NEW_PAGES: u32 = 5;
const PAGE_SIZE: u32 = 100;
const NEW_CUTOFF_HOURS: i64 = 24;

pub async fn handle_subreddit(ctx: WorkerContext, subreddit_id: String) -> Outcome {
    let Ok(subreddit_id) = subreddit_id.parse::<i64>() else {
        warn!(payload = %subreddit_id, "subreddits worker received a non-numeric payload");
        return Outcome::Ack;
    };

    let subreddit = match ctx.store.subreddits.get(subreddit_id).await {
        Ok(Some(s)) => s,
        Ok(None) => return Outcome::Ack,
        Err(e) => {
            warn!(subreddit_id, error = %e, "failed to load subreddit");
            return Outcome::Reject;
        }
    };

    let watchers: Vec<Watcher> = match ctx.store.watchers.list_for_subreddit(subreddit_id).await {
        Ok(w) => w.into_iter().filter(|w| w.watcher_type == WatcherType::Subreddit).collect(),
        Err(e) => {
            warn!(subreddit_id, error = %e, "failed to load watchers");
            return Outcome::Reject;
        }
    };

    if watchers.is_empty() {
        return Outcome::Ack;
    }

    let posts = match collect_candidate_posts(&ctx, &subreddit.name).await {
        Ok(posts) => posts,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    let now = Utc::now();

    for post in &posts {
        for watcher in &watchers {
            if !watcher.allows_post_at(post.created_at) {
                continue;
            }
            if !watcher_match::matches(watcher, post) {
                continue;
            }

            match ctx.dedup.claim_watcher_notification(watcher.device_id, &post.id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "dedup claim failed");
                    continue;
                }
            }

            push_watcher_hit(&ctx, watcher, post, now, payload::subreddit_watcher_hit_alert, "subreddits").await;
        }
    }

    Outcome::Ack
}

/// Merges up to 5 "new" pages (back to a 24h cutoff) with one "hot" page,
/// deduplicated by post id (§4.3.2).
async fn collect_candidate_posts(ctx: &WorkerContext, name: &str) -> crate::upstream::Result<Vec<Post>> {
    let mut seen: HashMap<String, Post> = HashMap::new();
    let cutoff = Utc::now() - chrono::Duration::hours(NEW_CUTOFF_HOURS);

    let mut after: Option<String> = None;
    for _ in 0..NEW_PAGES {
        let page = ctx
            .upstream
            .subreddit_listing(name, ListingSort::New, after.as_deref(), PAGE_SIZE)
            .await?;
        if page.is_empty() {
            break;
        }

        let reached_cutoff = page.last().map(|p| p.created_at < cutoff).unwrap_or(false);
        after = page.last().map(|p| p.id.clone());

        for post in page {
            if post.created_at >= cutoff {
                seen.insert(post.id.clone(), post);
            }
        }

        if reached_cutoff {
            break;
        }
    }

    for post in fetch_hot_page(ctx, name).await? {
        seen.insert(post.id.clone(), post);
    }

    Ok(seen.into_values().collect())
}

pub(super) async fn fetch_hot_page(ctx: &WorkerContext, name: &str) -> crate::upstream::Result<Vec<Post>> {
    ctx.upstream.subreddit_listing(name, ListingSort::Hot, None, PAGE_SIZE).await
}

/// Records the hit, loads the target device, builds the alert with
/// `alert_fn`, and pushes. Shared by the subreddits and trending workers,
/// which differ only in dedup key, payload shape, and metrics tag.
pub(super) async fn push_watcher_hit(
    ctx: &WorkerContext,
    watcher: &Watcher,
    post: &Post,
    now: chrono::DateTime<Utc>,
    alert_fn: impl Fn(&Watcher, &Post, chrono::DateTime<Utc>) -> serde_json::Value,
    metrics_tag: &'static str,
) {
    if let Err(e) = ctx.store.watchers.record_hit(watcher.id, now).await {
        warn!(watcher_id = watcher.id, error = %e, "failed to record watcher hit");
    }

    let device = match ctx.store.devices.get(watcher.device_id).await {
        Ok(Some(d)) => d,
        Ok(None) => return,
        Err(e) => {
            warn!(device_id = watcher.device_id, error = %e, "failed to load device");
            return;
        }
    };

    let notification = Notification {
        device_token: device.apns_token,
        sandbox: device.sandbox,
        topic: ctx.push_topic.to_string(),
        push_type: Some(PushType::Alert),
        collapse_id: None,
        expiration: None,
        priority: Priority::Immediate,
        payload: alert_fn(watcher, post, now),
    };

    if let Err(e) = ctx.push.push(notification).await {
        ctx.metrics.incr("patrol.push.errors", &[("queue", metrics_tag)]);
        warn!(device_id = watcher.device_id, error = %e, "push failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;

    use super::*;
    use crate::dedup::MockDedupClient;
    use crate::lock::MockWorkerLock;
    use crate::model::{Device, Subreddit};
    use crate::push::{MockPushClient, PushResponse};
    use crate::store::PostgresStore;
    use crate::store::ports::{
        MockAccountRepository, MockDeviceRepository, MockLiveActivityRepository, MockSubredditRepository,
        MockWatchedUserRepository, MockWatcherRepository,
    };
    use crate::telemetry::TracingMetrics;
    use crate::upstream::MockUpstreamClient;

    fn base_subreddit() -> Subreddit {
        Subreddit {
            id: 1,
            remote_id: "t5_1".into(),
            name: "rust".into(),
            next_check_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn base_watcher() -> Watcher {
        Watcher {
            id: 7,
            created_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            last_notified_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            label: "watch".into(),
            device_id: 10,
            account_id: 1,
            watcher_type: WatcherType::Subreddit,
            watchee_id: 1,
            author: None,
            subreddit: None,
            min_upvotes: None,
            keyword: None,
            flair: None,
            domain: None,
            hits: 0,
        }
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.into(),
            title: "a post worth watching".into(),
            author: "some_author".into(),
            subreddit: "rust".into(),
            domain: "self.rust".into(),
            flair: None,
            score: 10,
            num_comments: 1,
            created_at: Utc::now(),
            over_18: false,
            thumbnail: None,
        }
    }

    fn test_ctx(
        watchers: MockWatcherRepository,
        subreddits: MockSubredditRepository,
        devices: MockDeviceRepository,
        upstream: MockUpstreamClient,
        push: MockPushClient,
        dedup: MockDedupClient,
    ) -> WorkerContext {
        let store = PostgresStore::new_for_test(
            Arc::new(MockAccountRepository::new()),
            Arc::new(devices),
            Arc::new(subreddits),
            Arc::new(MockWatchedUserRepository::new()),
            Arc::new(watchers),
            Arc::new(MockLiveActivityRepository::new()),
        );

        WorkerContext {
            store,
            locks: Arc::new(MockWorkerLock::new()),
            upstream: Arc::new(upstream),
            push: Arc::new(push),
            metrics: Arc::new(TracingMetrics),
            push_topic: Arc::from("com.example.patrol"),
            dedup: Arc::new(dedup),
        }
    }

    fn expect_candidate_posts(upstream: &mut MockUpstreamClient, posts: Vec<Post>) {
        // An empty "new" page short-circuits `collect_candidate_posts`
        // straight to the one "hot" page, so a single branching stub covers
        // both calls it makes.
        upstream.expect_subreddit_listing().returning(move |_, sort, _, _| match sort {
            ListingSort::Hot => Ok(posts.clone()),
            _ => Ok(Vec::new()),
        });
    }

    #[tokio::test]
    async fn s3_first_run_claims_dedup_and_pushes_every_matching_post() {
        let mut watchers = MockWatcherRepository::new();
        watchers.expect_list_for_subreddit().with(eq(1)).returning(|_| Ok(vec![base_watcher()]));
        watchers.expect_record_hit().times(2).returning(|_, _| Ok(()));

        let mut subreddits = MockSubredditRepository::new();
        subreddits.expect_get().with(eq(1)).returning(|_| Ok(Some(base_subreddit())));

        let mut devices = MockDeviceRepository::new();
        devices.expect_get().with(eq(10)).returning(|_| {
            Ok(Some(Device {
                id: 10,
                apns_token: "device-a".into(),
                sandbox: false,
                expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
                grace_period_expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
            }))
        });

        let mut upstream = MockUpstreamClient::new();
        expect_candidate_posts(&mut upstream, vec![post("p1"), post("p2")]);

        let mut push = MockPushClient::new();
        push.expect_push().times(2).returning(|_| {
            Ok(PushResponse { status: 200, apns_id: Some("id".into()), reason: None, sent: true })
        });

        let mut dedup = MockDedupClient::new();
        dedup.expect_claim_watcher_notification().times(2).returning(|_, _| Ok(true));

        let ctx = test_ctx(watchers, subreddits, devices, upstream, push, dedup);

        let outcome = handle_subreddit(ctx, "1".into()).await;
        assert!(matches!(outcome, Outcome::Ack));
    }

    #[tokio::test]
    async fn s3_second_run_against_already_claimed_posts_pushes_nothing() {
        let mut watchers = MockWatcherRepository::new();
        watchers.expect_list_for_subreddit().with(eq(1)).returning(|_| Ok(vec![base_watcher()]));

        let mut subreddits = MockSubredditRepository::new();
        subreddits.expect_get().with(eq(1)).returning(|_| Ok(Some(base_subreddit())));

        let devices = MockDeviceRepository::new();

        let mut upstream = MockUpstreamClient::new();
        expect_candidate_posts(&mut upstream, vec![post("p1"), post("p2")]);

        let push = MockPushClient::new();

        let mut dedup = MockDedupClient::new();
        dedup.expect_claim_watcher_notification().times(2).returning(|_, _| Ok(false));

        let ctx = test_ctx(watchers, subreddits, devices, upstream, push, dedup);

        let outcome = handle_subreddit(ctx, "1".into()).await;
        assert!(matches!(outcome, Outcome::Ack));
    }
}
