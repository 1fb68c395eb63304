//! §4.3.1: per-account inbox delta detection and fan-out to every linked,
//! notifiable device.

use tracing::warn;

use super::{Outcome, WorkerContext, maybe_refresh, retryable_to_outcome};
use crate::push::{Notification, Priority, PushType, payload};
use crate::upstream::{Credentials, UpstreamError};

pub async fn handle_notification(ctx: WorkerContext, account_id: String) -> Outcome {
    let Ok(account_id) = account_id.parse::<i64>() else {
        warn!(payload = %account_id, "notifications worker received a non-numeric payload");
        return Outcome::Ack;
    };

    let account = match ctx.store.accounts.get(account_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return Outcome::Ack,
        Err(e) => {
            warn!(account_id, error = %e, "failed to load account");
            return Outcome::Reject;
        }
    };

    let creds = Credentials {
        remote_account_id: account.remote_id.clone(),
        access_token: account.access_token.clone(),
        refresh_token: account.refresh_token.clone(),
    };

    let (creds, refreshed) = match maybe_refresh(&ctx, creds, account.token_expires_at).await {
        Ok(result) => result,
        Err(UpstreamError::OAuthRevoked) => return Outcome::Ack,
        Err(e) => {
            warn!(account_id, error = %e, "token refresh failed");
            return retryable_to_outcome(&e);
        }
    };

    if let Some(refreshed) = &refreshed {
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(refreshed.expires_in_secs);
        if let Err(e) = ctx
            .store
            .accounts
            .update_tokens(account_id, &refreshed.access_token, &refreshed.refresh_token, expires_at)
            .await
        {
            warn!(account_id, error = %e, "failed to persist refreshed tokens");
        }
    }

    let unread = match ctx.upstream.message_unread(&creds).await {
        Ok(items) => items,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    if unread.is_empty() {
        if let Err(e) = ctx.store.accounts.touch_last_checked(account_id).await {
            warn!(account_id, error = %e, "failed to touch last_checked_at");
        }
        return Outcome::Ack;
    }

    let newest = &unread[0].full_name;

    if !account.has_watermark() {
        if let Err(e) = ctx.store.accounts.update_watermark(account_id, newest).await {
            warn!(account_id, error = %e, "failed to set initial watermark");
            return Outcome::Reject;
        }
        return Outcome::Ack;
    }

    if let Err(e) = ctx.store.accounts.update_watermark(account_id, newest).await {
        warn!(account_id, error = %e, "failed to advance watermark");
        return Outcome::Reject;
    }

    let devices = match ctx.store.devices.list_inbox_notifiable(account_id).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(account_id, error = %e, "failed to load notifiable devices");
            return Outcome::Reject;
        }
    };

    for item in &unread {
        let payload = payload::inbox_item_alert(item, account_id, Some(&item.subject), unread.len());

        for device in &devices {
            let notification = Notification {
                device_token: device.apns_token.clone(),
                sandbox: device.sandbox,
                topic: ctx.push_topic.to_string(),
                push_type: Some(PushType::Alert),
                collapse_id: None,
                expiration: None,
                priority: Priority::Immediate,
                payload: payload.clone(),
            };

            if let Err(e) = ctx.push.push(notification).await {
                ctx.metrics.incr("patrol.push.errors", &[("queue", "notifications")]);
                warn!(device_id = device.id, error = %e, "push failed");
            }
        }
    }

    Outcome::Ack
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;

    use super::*;
    use crate::dedup::MockDedupClient;
    use crate::lock::MockWorkerLock;
    use crate::model::Account;
    use crate::push::MockPushClient;
    use crate::store::PostgresStore;
    use crate::store::ports::{
        MockAccountRepository, MockDeviceRepository, MockLiveActivityRepository, MockSubredditRepository,
        MockWatchedUserRepository, MockWatcherRepository,
    };
    use crate::telemetry::TracingMetrics;
    use crate::upstream::{InboxItem, InboxItemKind, MockUpstreamClient};

    fn base_account(last_message_id: &str) -> Account {
        Account {
            id: 1,
            remote_id: "t2_1".into(),
            username: "scout".into(),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 1, 0, 0).unwrap(),
            last_message_id: last_message_id.into(),
            next_notification_check_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
            next_stuck_notification_check_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
            check_count: 0,
        }
    }

    fn inbox_item(full_name: &str) -> InboxItem {
        InboxItem {
            full_name: full_name.into(),
            kind: InboxItemKind::CommentReply,
            author: "replier".into(),
            subject: "comment reply".into(),
            body: "nice post".into(),
            context: "/r/rust/comments/abc".into(),
            subreddit: Some("rust".into()),
            was_comment: true,
            deleted: false,
        }
    }

    fn test_ctx(
        accounts: MockAccountRepository,
        devices: MockDeviceRepository,
        upstream: MockUpstreamClient,
        push: MockPushClient,
    ) -> WorkerContext {
        let store = PostgresStore::new_for_test(
            Arc::new(accounts),
            Arc::new(devices),
            Arc::new(MockSubredditRepository::new()),
            Arc::new(MockWatchedUserRepository::new()),
            Arc::new(MockWatcherRepository::new()),
            Arc::new(MockLiveActivityRepository::new()),
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
    async fn s1_first_run_sets_watermark_without_paging_a_newly_subscribed_inbox() {
        let mut accounts = MockAccountRepository::new();
        accounts.expect_get().with(eq(1)).returning(|_| Ok(Some(base_account(""))));
        accounts.expect_update_watermark().withf(|id, newest| *id == 1 && newest == "t1_new").returning(|_, _| Ok(()));

        let devices = MockDeviceRepository::new();

        let mut upstream = MockUpstreamClient::new();
        upstream.expect_message_unread().returning(|_| Ok(vec![inbox_item("t1_new")]));

        let push = MockPushClient::new();

        let ctx = test_ctx(accounts, devices, upstream, push);

        let outcome = handle_notification(ctx, "1".into()).await;
        assert!(matches!(outcome, Outcome::Ack));
    }

    #[tokio::test]
    async fn s2_delta_fans_out_every_unread_item_to_every_notifiable_device() {
        let mut accounts = MockAccountRepository::new();
        accounts.expect_get().with(eq(1)).returning(|_| Ok(Some(base_account("t1_old"))));
        accounts.expect_update_watermark().returning(|_, _| Ok(()));

        let mut devices = MockDeviceRepository::new();
        devices.expect_list_inbox_notifiable().with(eq(1)).returning(|_| {
            Ok(vec![
                crate::model::Device {
                    id: 10,
                    apns_token: "device-a".into(),
                    sandbox: false,
                    expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
                    grace_period_expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
                },
                crate::model::Device {
                    id: 11,
                    apns_token: "device-b".into(),
                    sandbox: false,
                    expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
                    grace_period_expires_at: Utc.with_ymd_and_hms(2090, 1, 1, 0, 0, 0).unwrap(),
                },
            ])
        });

        let mut upstream = MockUpstreamClient::new();
        upstream
            .expect_message_unread()
            .returning(|_| Ok(vec![inbox_item("t1_newer"), inbox_item("t1_old")]));

        let mut push = MockPushClient::new();
        push.expect_push().times(4).returning(|_| {
            Ok(crate::push::PushResponse { status: 200, apns_id: Some("id".into()), reason: None, sent: true })
        });

        let ctx = test_ctx(accounts, devices, upstream, push);

        let outcome = handle_notification(ctx, "1".into()).await;
        assert!(matches!(outcome, Outcome::Ack));
    }
}
