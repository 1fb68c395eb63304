//! Payload construction for the four notification shapes the core knows how
//! to build. Everything here produces a `serde_json::Value` destined for
//! `Notification::payload`; none of it talks to a provider.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;

use crate::model::Watcher;
use crate::upstream::{InboxItem, InboxItemKind, Post};

const BODY_TRUNCATE: usize = 2000;
const SUBTITLE_TRUNCATE: usize = 75;

static COMMENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/r/[^/]+/comments/([^/]+)/").expect("static regex"));

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

/// Extracts the thread id embedded in an inbox item's `context` permalink,
/// e.g. `/r/rust/comments/abc123/some_title/def456/` → `abc123`.
fn parent_id_from_context(context: &str) -> Option<String> {
    COMMENT_ID_RE.captures(context).map(|c| c[1].to_string())
}

fn inbox_item_title(item: &InboxItem) -> &'static str {
    match item.kind {
        InboxItemKind::CommentReply => "New comment reply",
        InboxItemKind::PostReply => "New post reply",
        InboxItemKind::UsernameMention => "New username mention",
        InboxItemKind::PrivateMessage => "New private message",
    }
}

fn inbox_item_category(item: &InboxItem) -> &'static str {
    match item.kind {
        InboxItemKind::CommentReply => "t1/comment_reply",
        InboxItemKind::PostReply => "t1/post_reply",
        InboxItemKind::UsernameMention => "t1/username_mention",
        InboxItemKind::PrivateMessage => "t4",
    }
}

/// §4.5: inbox item → alert. `post_title` is the subject line of the
/// parent post when known (threads fetched separately); absent for plain
/// private messages, which carry no post.
///
/// `badge_count` is the number of unread items the triggering fetch
/// returned, not the account's true unread count (the upstream inbox
/// listing has no total-unread field short of paging through everything).
/// Kept as-is rather than computed properly, matching the source's own
/// behavior.
pub fn inbox_item_alert(
    item: &InboxItem,
    account_id: i64,
    post_title: Option<&str>,
    badge_count: usize,
) -> Value {
    let body = truncate_with_ellipsis(&item.body, BODY_TRUNCATE);
    let subtitle = post_title.map(|t| truncate_with_ellipsis(t, SUBTITLE_TRUNCATE));
    let parent_id = parent_id_from_context(&item.context);

    json!({
        "aps": {
            "alert": {
                "title": inbox_item_title(item),
                "subtitle": subtitle,
                "body": body,
            },
            "badge": badge_count,
            "category": inbox_item_category(item),
            "thread-id": inbox_item_category(item),
            "mutable-content": 1,
        },
        "account_id": account_id,
        "author": item.author,
        "parent_id": parent_id,
        "post_id": parent_id,
        "subject": item.subject,
        "type": inbox_item_category(item),
        "subreddit": item.subreddit,
    })
}

fn post_age_label(post: &Post, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(post.created_at);
    if age.num_hours() < 1 {
        format!("{}m", age.num_minutes().max(0))
    } else if age.num_hours() < 24 {
        format!("{}h", age.num_hours())
    } else {
        format!("{}d", age.num_days())
    }
}

/// §4.5: subreddit-watcher hit → alert. Shared by the subreddit (24h
/// dedup) and trending (48h dedup) worker, which differ only in
/// `category`/`thread-id` — `trending` passes the fixed literal.
fn watcher_hit_alert(watcher: &Watcher, post: &Post, now: DateTime<Utc>, category: &str, thread_id: &str) -> Value {
    let thumbnail = if post.over_18 { None } else { post.thumbnail.as_deref() };

    json!({
        "aps": {
            "alert": {
                "title": watcher.label,
                "body": post.title,
            },
            "category": category,
            "thread-id": thread_id,
            "mutable-content": 1,
        },
        "post_id": post.id,
        "post_title": post.title,
        "subreddit": post.subreddit,
        "author": post.author,
        "age": post_age_label(post, now),
        "thumbnail": thumbnail,
    })
}

pub fn subreddit_watcher_hit_alert(watcher: &Watcher, post: &Post, now: DateTime<Utc>) -> Value {
    watcher_hit_alert(watcher, post, now, "subreddit-post", "subreddit-post")
}

pub fn trending_hit_alert(watcher: &Watcher, post: &Post, now: DateTime<Utc>) -> Value {
    watcher_hit_alert(watcher, post, now, "trending-post", "trending-post")
}

/// The compact "dynamic island" state for a live activity: the post's
/// running comment count and score, plus (if the expanding window turned
/// one up) the highest-scored recent top-level comment.
#[derive(Debug, Clone)]
pub struct DynamicIslandNotification {
    pub comment_count: i64,
    pub post_score: i64,
    pub top_comment_id: Option<String>,
    pub top_comment_author: Option<String>,
    pub top_comment_body: Option<String>,
    pub top_comment_age_secs: Option<i64>,
    pub top_comment_score: Option<i64>,
}

impl DynamicIslandNotification {
    fn to_json(&self) -> Value {
        json!({
            "commentCount": self.comment_count,
            "postScore": self.post_score,
            "topCommentId": self.top_comment_id,
            "topCommentAuthor": self.top_comment_author,
            "topCommentBody": self.top_comment_body,
            "topCommentAgeSecs": self.top_comment_age_secs,
            "topCommentScore": self.top_comment_score,
        })
    }
}

/// §4.5: live activity update → liveactivity. `event` is `"end"` once
/// `now >= expires_at`, `"update"` otherwise — the caller decides and
/// passes it in since that branch also governs whether to delete the row.
pub fn live_activity_update(
    event: &str,
    now: DateTime<Utc>,
    dismissal_date: DateTime<Utc>,
    content_state: &DynamicIslandNotification,
) -> Value {
    json!({
        "aps": {
            "event": event,
            "timestamp": now.timestamp(),
            "dismissal-date": dismissal_date.timestamp(),
            "content-state": content_state.to_json(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WatcherType;
    use chrono::TimeZone;

    fn sample_post() -> Post {
        Post {
            id: "abc123".into(),
            title: "a".repeat(100),
            author: "some_author".into(),
            subreddit: "rust".into(),
            domain: "self.rust".into(),
            flair: None,
            score: 42,
            num_comments: 3,
            created_at: Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap(),
            over_18: false,
            thumbnail: Some("https://example.com/t.jpg".into()),
        }
    }

    fn sample_watcher() -> Watcher {
        Watcher {
            id: 1,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_notified_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            label: "rust posts".into(),
            device_id: 1,
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

    #[test]
    fn truncation_appends_ellipsis_only_when_over_limit() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        let long = "a".repeat(20);
        let truncated = truncate_with_ellipsis(&long, 10);
        assert_eq!(truncated.chars().count(), 11);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn parent_id_extracted_from_comment_permalink() {
        let context = "/r/rust/comments/abc123/some_title/def456/";
        assert_eq!(parent_id_from_context(context), Some("abc123".to_string()));
    }

    #[test]
    fn parent_id_absent_without_a_comments_segment() {
        assert_eq!(parent_id_from_context("/message/messages/xyz/"), None);
    }

    #[test]
    fn watcher_hit_alert_omits_thumbnail_for_over_18_posts() {
        let mut post = sample_post();
        post.over_18 = true;
        let watcher = sample_watcher();
        let payload = subreddit_watcher_hit_alert(&watcher, &post, Utc::now());
        assert!(payload["thumbnail"].is_null());
    }

    #[test]
    fn trending_hit_alert_uses_fixed_category() {
        let post = sample_post();
        let watcher = sample_watcher();
        let payload = trending_hit_alert(&watcher, &post, Utc::now());
        assert_eq!(payload["aps"]["category"], "trending-post");
        assert_eq!(payload["aps"]["thread-id"], "trending-post");
    }

    #[test]
    fn subtitle_truncated_at_75_chars() {
        let item = InboxItem {
            full_name: "t1_xyz".into(),
            kind: InboxItemKind::CommentReply,
            author: "someone".into(),
            subject: "comment reply".into(),
            body: "hello".into(),
            context: "/r/rust/comments/abc123/title/def456/".into(),
            subreddit: Some("rust".into()),
            was_comment: true,
            deleted: false,
        };
        let long_title = "a".repeat(100);
        let payload = inbox_item_alert(&item, 7, Some(&long_title), 3);
        let subtitle = payload["aps"]["alert"]["subtitle"].as_str().unwrap();
        assert_eq!(subtitle.chars().count(), 76);
        assert_eq!(payload["aps"]["badge"], 3);
    }
}
