//! §4.3.4: watched-external-user post matching.

use chrono::Utc;
use tracing::warn;

use super::subreddits::push_watcher_hit;
use super::{Outcome, WorkerContext, maybe_refresh};
use crate::push::payload;
use crate::upstream::{Credentials, UpstreamError};
use crate::watcher_match::strings_match_ci;

pub async fn handle_user(ctx: WorkerContext, user_id: String) -> Outcome {
    let Ok(user_id) = user_id.parse::<i64>() else {
        warn!(payload = %user_id, "users worker received a non-numeric payload");
        return Outcome::Ack;
    };

    let watched_user = match ctx.store.watched_users.get(user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return Outcome::Ack,
        Err(e) => {
            warn!(user_id, error = %e, "failed to load watched user");
            return Outcome::Reject;
        }
    };

    let watchers = match ctx.store.watchers.list_for_user(user_id).await {
        Ok(w) => w,
        Err(e) => {
            warn!(user_id, error = %e, "failed to load watchers");
            return Outcome::Reject;
        }
    };

    if watchers.is_empty() {
        return Outcome::Ack;
    }

    // Any linked account's credentials can make the (unauthenticated)
    // `user_about` call; the authenticated `user_posts` call borrows the
    // same account the watcher was created against.
    let account = match ctx.store.accounts.get(watchers[0].account_id).await {
        Ok(Some(a)) => a,
        Ok(None) => return Outcome::Reject,
        Err(e) => {
            warn!(user_id, error = %e, "failed to load borrowing account");
            return Outcome::Reject;
        }
    };

    let about = match ctx.upstream.user_about(&watched_user.name).await {
        Ok(about) => about,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    if !about.accepts_followers {
        if let Err(e) = ctx.store.watchers.delete_for_user(user_id).await {
            warn!(user_id, error = %e, "failed to delete watchers for user");
            return Outcome::Reject;
        }
        if let Err(e) = ctx.store.watched_users.delete(user_id).await {
            warn!(user_id, error = %e, "failed to delete watched user");
            return Outcome::Reject;
        }
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
            warn!(user_id, error = %e, "token refresh failed");
            return super::retryable_to_outcome(&e);
        }
    };

    if let Some(refreshed) = &refreshed {
        let expires_at = Utc::now() + chrono::Duration::seconds(refreshed.expires_in_secs);
        if let Err(e) = ctx
            .store
            .accounts
            .update_tokens(account.id, &refreshed.access_token, &refreshed.refresh_token, expires_at)
            .await
        {
            warn!(account_id = account.id, error = %e, "failed to persist refreshed tokens");
        }
    }

    let posts = match ctx.upstream.user_posts(&creds, &watched_user.name).await {
        Ok(posts) => posts,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    let now = Utc::now();

    for post in &posts {
        for watcher in &watchers {
            if watcher.created_at > post.created_at || watcher.last_notified_at > post.created_at {
                continue;
            }
            if let Some(subreddit) = &watcher.subreddit {
                if !strings_match_ci(subreddit, &post.subreddit) {
                    continue;
                }
            }

            match ctx.dedup.claim_watcher_notification(watcher.device_id, &post.id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "dedup claim failed");
                    continue;
                }
            }

            push_watcher_hit(&ctx, watcher, post, now, payload::subreddit_watcher_hit_alert, "users").await;
        }
    }

    Outcome::Ack
}
