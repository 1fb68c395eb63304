//! §4.3.3: subreddit-scoped trending detection. Shares its payload and
//! dedup lock with the subreddits worker (no separate `locks:trending:*`
//! key exists, §6) but evaluates a different rule: hot posts scoring at or
//! above the past week's median, recent enough to still be "trending".

use chrono::Utc;
use tracing::warn;

use super::subreddits::{fetch_hot_page, push_watcher_hit};
use super::{Outcome, WorkerContext};
use crate::model::WatcherType;
use crate::push::payload;
use crate::upstream::{ListingSort, Post};

const TOP_WEEK_SAMPLE: u32 = 25;
const MIN_SAMPLE: usize = 20;
const MAX_AGE_DAYS: i64 = 2;

pub async fn handle_trending(ctx: WorkerContext, subreddit_id: String) -> Outcome {
    let Ok(subreddit_id) = subreddit_id.parse::<i64>() else {
        warn!(payload = %subreddit_id, "trending worker received a non-numeric payload");
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

    let watchers: Vec<_> = match ctx.store.watchers.list_for_subreddit(subreddit_id).await {
        Ok(w) => w.into_iter().filter(|w| w.watcher_type == WatcherType::Trending).collect(),
        Err(e) => {
            warn!(subreddit_id, error = %e, "failed to load watchers");
            return Outcome::Reject;
        }
    };

    if watchers.is_empty() {
        return Outcome::Ack;
    }

    let top_week = match ctx
        .upstream
        .subreddit_listing(&subreddit.name, ListingSort::Top, None, TOP_WEEK_SAMPLE)
        .await
    {
        Ok(posts) => posts,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    if top_week.len() < MIN_SAMPLE {
        return Outcome::Ack;
    }

    let median = median_score(&top_week);

    let hot = match fetch_hot_page(&ctx, &subreddit.name).await {
        Ok(posts) => posts,
        Err(e) if e.is_retryable() => return Outcome::Reject,
        Err(_) => return Outcome::Ack,
    };

    let now = Utc::now();

    for post in &hot {
        if post.score < median {
            continue;
        }
        if (now - post.created_at).num_days() > MAX_AGE_DAYS {
            continue;
        }

        for watcher in &watchers {
            if !watcher.allows_post_at(post.created_at) {
                continue;
            }

            match ctx.dedup.claim_trending_notification(watcher.device_id, &post.id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "dedup claim failed");
                    continue;
                }
            }

            push_watcher_hit(&ctx, watcher, post, now, payload::trending_hit_alert, "trending").await;
        }
    }

    Outcome::Ack
}

/// Median of an odd-or-even sample, by score. §4.3.3/S4: 25 scores sorted
/// descending `[100,90,...,10]` has median 55 (the 13th value).
fn median_score(posts: &[Post]) -> i64 {
    let mut scores: Vec<i64> = posts.iter().map(|p| p.score).collect();
    scores.sort_unstable();
    let mid = scores.len() / 2;
    if scores.len() % 2 == 0 {
        (scores[mid - 1] + scores[mid]) / 2
    } else {
        scores[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(score: i64) -> Post {
        Post {
            id: format!("p{score}"),
            title: String::new(),
            author: String::new(),
            subreddit: String::new(),
            domain: String::new(),
            flair: None,
            score,
            num_comments: 0,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            over_18: false,
            thumbnail: None,
        }
    }

    #[test]
    fn median_of_odd_sample_is_the_middle_sorted_value() {
        let posts: Vec<Post> = (1..=25).rev().map(|i| post(i * 10)).collect();
        assert_eq!(posts.len(), 25);
        assert_eq!(median_score(&posts), 130);
    }

    #[test]
    fn s4_hot_post_at_median_threshold_emits_only_within_the_age_window() {
        let median = 55;
        let hot = post(60);
        assert!(hot.score >= median);

        let recent = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let stale_boundary = recent - chrono::Duration::days(3);
        let fresh_boundary = recent - chrono::Duration::days(1);

        assert!((recent - stale_boundary).num_days() > MAX_AGE_DAYS);
        assert!((recent - fresh_boundary).num_days() <= MAX_AGE_DAYS);
    }

    #[test]
    fn median_of_even_sample_averages_the_middle_two() {
        let posts = vec![post(10), post(20), post(30), post(40)];
        assert_eq!(median_score(&posts), 25);
    }
}
