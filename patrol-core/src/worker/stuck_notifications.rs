//! §4.3.5: breaks an account's "stuck on a deleted thing" loop, where the
//! watermark item was itself removed before it was ever the newest.

use tracing::warn;

use super::{Outcome, WorkerContext, maybe_refresh, retryable_to_outcome};
use crate::upstream::{Credentials, InboxItem, UpstreamError};

const PRIVATE_MESSAGE_PREFIX: &str = "t4_";

pub async fn handle_stuck_notification(ctx: WorkerContext, account_id: String) -> Outcome {
    let Ok(account_id) = account_id.parse::<i64>() else {
        warn!(payload = %account_id, "stuck-notifications worker received a non-numeric payload");
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

    if account.last_message_id.is_empty() {
        return Outcome::Ack;
    }

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

    let watermark_ok = if account.last_message_id.starts_with(PRIVATE_MESSAGE_PREFIX) {
        match ctx.upstream.message_inbox(&creds).await {
            Ok(inbox) => inbox
                .iter()
                .find(|item| item.full_name == account.last_message_id)
                .map(|item| !item.deleted),
            Err(e) if e.is_retryable() => return Outcome::Reject,
            Err(_) => return Outcome::Ack,
        }
    } else {
        match ctx.upstream.about_info(&creds, &account.last_message_id).await {
            Ok(item) => item.map(|item| !item.deleted),
            Err(e) if e.is_retryable() => return Outcome::Reject,
            Err(_) => return Outcome::Ack,
        }
    };

    // `Some(true)` = found and live, nothing stuck. `None` (not found) or
    // `Some(false)` (found deleted) both mean the watermark is unusable.
    if watermark_ok == Some(true) {
        return Outcome::Ack;
    }

    let inbox = match ctx.upstream.message_inbox(&creds).await {
        Ok(inbox) => inbox,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    let Some(replacement) = first_non_deleted(&inbox) else {
        return Outcome::Ack;
    };

    if let Err(e) = ctx.store.accounts.update_watermark(account_id, &replacement.full_name).await {
        warn!(account_id, error = %e, "failed to reset watermark off a deleted item");
        return Outcome::Reject;
    }

    Outcome::Ack
}

fn first_non_deleted(inbox: &[InboxItem]) -> Option<&InboxItem> {
    inbox.iter().find(|item| !item.deleted)
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
    use crate::upstream::{InboxItemKind, MockUpstreamClient};

    fn account_with_watermark(last_message_id: &str) -> Account {
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

    fn inbox_item(full_name: &str, deleted: bool) -> InboxItem {
        InboxItem {
            full_name: full_name.into(),
            kind: InboxItemKind::CommentReply,
            author: "replier".into(),
            subject: "comment reply".into(),
            body: "nice post".into(),
            context: "/r/rust/comments/abc".into(),
            subreddit: Some("rust".into()),
            was_comment: true,
            deleted,
        }
    }

    fn test_ctx(accounts: MockAccountRepository, upstream: MockUpstreamClient) -> WorkerContext {
        let store = PostgresStore::new_for_test(
            Arc::new(accounts),
            Arc::new(MockDeviceRepository::new()),
            Arc::new(MockSubredditRepository::new()),
            Arc::new(MockWatchedUserRepository::new()),
            Arc::new(MockWatcherRepository::new()),
            Arc::new(MockLiveActivityRepository::new()),
        );

        WorkerContext {
            store,
            locks: Arc::new(MockWorkerLock::new()),
            upstream: Arc::new(upstream),
            push: Arc::new(MockPushClient::new()),
            metrics: Arc::new(TracingMetrics),
            push_topic: Arc::from("com.example.patrol"),
            dedup: Arc::new(MockDedupClient::new()),
        }
    }

    #[tokio::test]
    async fn s7_watermark_pointing_at_a_removed_comment_is_reset_to_the_newest_surviving_item() {
        let mut accounts = MockAccountRepository::new();
        accounts.expect_get().with(eq(1)).returning(|_| Ok(Some(account_with_watermark("t1_gone"))));
        accounts
            .expect_update_watermark()
            .withf(|id, newest| *id == 1 && newest == "t1_alive")
            .returning(|_, _| Ok(()));

        let mut upstream = MockUpstreamClient::new();
        // Not a `t4_` (private message) id, so the repair path checks it via
        // `about_info` rather than paging the inbox first.
        upstream.expect_about_info().returning(|_, _| Ok(None));
        upstream
            .expect_message_inbox()
            .returning(|_| Ok(vec![inbox_item("t1_deleted", true), inbox_item("t1_alive", false)]));

        let ctx = test_ctx(accounts, upstream);

        let outcome = handle_stuck_notification(ctx, "1".into()).await;
        assert!(matches!(outcome, Outcome::Ack));
    }
}
