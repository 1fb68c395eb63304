//! Watcher criteria evaluation: every non-empty field on a [`Watcher`] is
//! ANDed against the candidate post. `keyword` alone gets multi-term
//! splitting (§3, §8 invariant 6); everything else is a direct (lowercased,
//! for strings) equality or threshold check.

use crate::model::Watcher;
use crate::upstream::Post;

/// `match(title, "")` is `true`; `match(title, "a+b")` iff every
/// `+`/`,`-separated term is a lowercase substring of the lowercased title.
fn keyword_matches(keyword: &str, haystack: &str) -> bool {
    if keyword.is_empty() {
        return true;
    }
    let haystack = haystack.to_lowercase();
    keyword
        .split(['+', ','])
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| haystack.contains(&term.to_lowercase()))
}

pub fn strings_match_ci(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Evaluates every set criterion on `watcher` against `post`. Does not
/// check the origin-rule timing invariant (`created_at`/`last_notified_at`)
/// — callers apply [`Watcher::allows_post_at`] separately, since timing
/// gates which posts are even considered, not which ones match content.
pub fn matches(watcher: &Watcher, post: &Post) -> bool {
    if let Some(author) = &watcher.author {
        if !strings_match_ci(author, &post.author) {
            return false;
        }
    }
    if let Some(subreddit) = &watcher.subreddit {
        if !strings_match_ci(subreddit, &post.subreddit) {
            return false;
        }
    }
    if let Some(min_upvotes) = watcher.min_upvotes {
        if post.score < min_upvotes {
            return false;
        }
    }
    if let Some(flair) = &watcher.flair {
        match &post.flair {
            Some(post_flair) if strings_match_ci(flair, post_flair) => {}
            _ => return false,
        }
    }
    if let Some(domain) = &watcher.domain {
        if !strings_match_ci(domain, &post.domain) {
            return false;
        }
    }
    if let Some(keyword) = &watcher.keyword {
        if !keyword_matches(keyword, &post.title) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WatcherType;
    use chrono::{TimeZone, Utc};

    fn base_watcher() -> Watcher {
        Watcher {
            id: 1,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_notified_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            label: "watch".into(),
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

    fn base_post() -> Post {
        Post {
            id: "abc".into(),
            title: "Apollo for iOS review".into(),
            author: "some_author".into(),
            subreddit: "rust".into(),
            domain: "self.rust".into(),
            flair: Some("Discussion".into()),
            score: 42,
            num_comments: 3,
            created_at: Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
            over_18: false,
            thumbnail: None,
        }
    }

    #[test]
    fn empty_criteria_matches_everything() {
        assert!(matches(&base_watcher(), &base_post()));
    }

    #[test]
    fn s5_keyword_multi_term_matches_when_all_terms_present() {
        let mut watcher = base_watcher();
        watcher.keyword = Some("apollo,ios".into());
        assert!(matches(&watcher, &base_post()));
    }

    #[test]
    fn s5_keyword_multi_term_rejects_when_a_term_is_missing() {
        let mut watcher = base_watcher();
        watcher.keyword = Some("apollo,ios".into());
        let mut post = base_post();
        post.title = "Apollo for Android".into();
        assert!(!matches(&watcher, &post));
    }

    #[test]
    fn empty_keyword_is_vacuously_true() {
        assert!(keyword_matches("", "anything"));
    }

    #[test]
    fn min_upvotes_is_a_lower_bound() {
        let mut watcher = base_watcher();
        watcher.min_upvotes = Some(100);
        assert!(!matches(&watcher, &base_post()));

        watcher.min_upvotes = Some(10);
        assert!(matches(&watcher, &base_post()));
    }

    #[test]
    fn string_criteria_are_case_insensitive() {
        let mut watcher = base_watcher();
        watcher.subreddit = Some("RUST".into());
        assert!(matches(&watcher, &base_post()));
    }

    #[test]
    fn flair_criterion_fails_closed_when_post_has_no_flair() {
        let mut watcher = base_watcher();
        watcher.flair = Some("Discussion".into());
        let mut post = base_post();
        post.flair = None;
        assert!(!matches(&watcher, &post));
    }

    #[test]
    fn criteria_are_anded() {
        let mut watcher = base_watcher();
        watcher.subreddit = Some("rust".into());
        watcher.min_upvotes = Some(100);
        assert!(!matches(&watcher, &base_post()));
    }
}
