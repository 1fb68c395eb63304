//! §4.3.6: live-activity ("dynamic island") updates for one bound thread.

use chrono::Utc;
use tracing::warn;

use super::{Outcome, WorkerContext, maybe_refresh, retryable_to_outcome};
use crate::push::payload::DynamicIslandNotification;
use crate::push::{Notification, Priority, PushType, payload};
use crate::scheduler::CategoryTuning;
use crate::upstream::{Comment, Credentials, UpstreamError};

/// Expanding windows tried, in order, to find a "new enough" top-level
/// comment: `{1x, 2x, 4x}` the category's own tick interval (§4.3.6).
const WINDOW_MULTIPLIERS: [i32; 3] = [1, 2, 4];

pub async fn handle_live_activity(ctx: WorkerContext, apns_token: String) -> Outcome {
    let live_activity = match ctx.store.live_activities.get(&apns_token).await {
        Ok(Some(la)) => la,
        Ok(None) => return Outcome::Ack,
        Err(e) => {
            warn!(apns_token, error = %e, "failed to load live activity");
            return Outcome::Reject;
        }
    };

    let creds = Credentials {
        remote_account_id: live_activity.remote_account_id.clone(),
        access_token: live_activity.access_token.clone(),
        refresh_token: live_activity.refresh_token.clone(),
    };

    let (creds, refreshed) = match maybe_refresh(&ctx, creds, live_activity.token_expires_at).await {
        Ok(result) => result,
        Err(UpstreamError::OAuthRevoked) => {
            delete_live_activity(&ctx, &apns_token).await;
            return Outcome::Ack;
        }
        Err(e) => {
            warn!(apns_token, error = %e, "token refresh failed");
            return retryable_to_outcome(&e);
        }
    };

    if let Some(refreshed) = &refreshed {
        let expires_at = Utc::now() + chrono::Duration::seconds(refreshed.expires_in_secs);
        if let Err(e) = ctx
            .store
            .live_activities
            .update_tokens(&apns_token, &refreshed.access_token, &refreshed.refresh_token, expires_at)
            .await
        {
            warn!(apns_token, error = %e, "failed to persist refreshed tokens");
        }
    }

    let comments = match ctx
        .upstream
        .top_level_comments(&creds, &live_activity.subreddit, &live_activity.thread_id)
        .await
    {
        Ok(comments) => comments,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    let now = Utc::now();
    let is_terminal = live_activity.is_terminal(now);
    let refresh_interval = CategoryTuning::live_activities().interval;
    let top_comment = find_top_comment(&comments, now, refresh_interval);

    if top_comment.is_none() && !is_terminal {
        // Nothing new in any window and the session isn't ending — no
        // update worth sending.
        return Outcome::Ack;
    }

    let content_state = DynamicIslandNotification {
        comment_count: comments.len() as i64,
        post_score: top_comment.map(|c| c.score).unwrap_or(0),
        top_comment_id: top_comment.map(|c| c.id.clone()),
        top_comment_author: top_comment.map(|c| c.author.clone()),
        top_comment_body: top_comment.map(|c| c.body.clone()),
        top_comment_age_secs: top_comment.map(|c| (now - c.created_at).num_seconds()),
        top_comment_score: top_comment.map(|c| c.score),
    };

    let event = if is_terminal { "end" } else { "update" };
    let alert = payload::live_activity_update(event, now, live_activity.expires_at, &content_state);

    let notification = Notification {
        device_token: apns_token.clone(),
        // `LiveActivity` carries no sandbox flag of its own (unlike `Device`);
        // ActivityKit pushes are registered directly against production APNs.
        sandbox: false,
        topic: format!("{}.push-type.liveactivity", ctx.push_topic),
        push_type: Some(PushType::LiveActivity),
        collapse_id: None,
        expiration: None,
        priority: Priority::Immediate,
        payload: alert,
    };

    let response = ctx.push.push(notification).await;

    let sent = match &response {
        Ok(response) => response.sent,
        Err(e) => {
            ctx.metrics.incr("patrol.push.errors", &[("queue", "live-activities")]);
            warn!(apns_token, error = %e, "push failed");
            false
        }
    };

    if is_terminal || !sent {
        delete_live_activity(&ctx, &apns_token).await;
    }

    Outcome::Ack
}

/// Picks the highest-scored comment newer than the narrowest window that
/// turns up any candidate, expanding `{1x, 2x, 4x}` the category's own
/// refresh interval (30 s), not the generic scheduler poll tick.
fn find_top_comment(
    comments: &[Comment],
    now: chrono::DateTime<Utc>,
    refresh_interval: chrono::Duration,
) -> Option<&Comment> {
    for multiplier in WINDOW_MULTIPLIERS {
        let window = refresh_interval * multiplier;
        let cutoff = now - window;
        let candidate = comments
            .iter()
            .filter(|c| c.created_at >= cutoff)
            .max_by_key(|c| c.score);
        if candidate.is_some() {
            return candidate;
        }
    }
    None
}

async fn delete_live_activity(ctx: &WorkerContext, apns_token: &str) {
    if let Err(e) = ctx.store.live_activities.delete(apns_token).await {
        warn!(apns_token, error = %e, "failed to delete live activity");
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
    use crate::model::LiveActivity;
    use crate::push::{MockPushClient, PushResponse};
    use crate::store::PostgresStore;
    use crate::store::ports::{
        MockAccountRepository, MockDeviceRepository, MockLiveActivityRepository, MockSubredditRepository,
        MockWatchedUserRepository, MockWatcherRepository,
    };
    use crate::telemetry::TracingMetrics;
    use crate::upstream::MockUpstreamClient;

    fn terminal_live_activity() -> LiveActivity {
        LiveActivity {
            apns_token: "token-1".into(),
            remote_account_id: "t2_1".into(),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
            thread_id: "abc123".into(),
            subreddit: "rust".into(),
            next_check_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            // In the past: `is_terminal(now)` is true for every `now` a test runs at.
            expires_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn test_ctx(live_activities: MockLiveActivityRepository, upstream: MockUpstreamClient, push: MockPushClient) -> WorkerContext {
        let store = PostgresStore::new_for_test(
            Arc::new(MockAccountRepository::new()),
            Arc::new(MockDeviceRepository::new()),
            Arc::new(MockSubredditRepository::new()),
            Arc::new(MockWatchedUserRepository::new()),
            Arc::new(MockWatcherRepository::new()),
            Arc::new(live_activities),
        );

        WorkerContext {
            store,
            locks: Arc::new(MockWorkerLock::new()),
            upstream: Arc::new(upstream),
            push: Arc::new(push),
            metrics: Arc::new(TracingMetrics),
            push_topic: Arc::from("com.example.patrol"),
            dedup: Arc::new(MockDedupClient::new()),
        }
    }

    #[tokio::test]
    async fn s6_terminal_activity_sends_an_end_push_and_deletes_the_row() {
        let mut live_activities = MockLiveActivityRepository::new();
        live_activities.expect_get().with(eq("token-1")).returning(|_| Ok(Some(terminal_live_activity())));
        live_activities.expect_delete().with(eq("token-1")).returning(|_| Ok(()));

        let mut upstream = MockUpstreamClient::new();
        upstream.expect_top_level_comments().returning(|_, _, _| Ok(Vec::new()));

        let mut push = MockPushClient::new();
        push.expect_push().times(1).returning(|_| {
            Ok(PushResponse { status: 200, apns_id: Some("id".into()), reason: None, sent: true })
        });

        let ctx = test_ctx(live_activities, upstream, push);

        let outcome = handle_live_activity(ctx, "token-1".into()).await;
        assert!(matches!(outcome, Outcome::Ack));
    }
}
