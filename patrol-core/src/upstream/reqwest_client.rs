use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{
    Comment, Credentials, InboxItem, ListingSort, Post, RefreshedTokens, Result, SubredditAbout,
    UpstreamClient, UpstreamError, UserAbout,
};
use crate::telemetry::Metrics;

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];
const RATE_LIMIT_REMAINING_FLOOR: i64 = 50;

/// A response with a body short enough to match one of the registered
/// `empty_response_bytes` hints short-circuits straight to a canonical
/// empty value without going through `serde_json`.
struct EmptyResponseHints {
    by_len: HashMap<usize, &'static str>,
}

impl EmptyResponseHints {
    fn new() -> Self {
        let mut by_len = HashMap::new();
        // `{"kind": "Listing", "data": {"children": []}}`-shaped empty
        // listings the social API returns for an empty inbox.
        by_len.insert(EMPTY_LISTING_BODY.len(), "listing");
        Self { by_len }
    }

    fn matches(&self, body_len: usize) -> bool {
        self.by_len.contains_key(&body_len)
    }
}

const EMPTY_LISTING_BODY: &str = r#"{"kind":"Listing","data":{"after":null,"before":null,"children":[],"dist":0}}"#;

#[derive(Clone)]
pub struct ReqwestUpstreamClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    metrics: Arc<dyn Metrics>,
    empty_hints: Arc<EmptyResponseHints>,
    hold_offs: Arc<Mutex<HashMap<String, Instant>>>,
}

impl ReqwestUpstreamClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        metrics: Arc<dyn Metrics>,
    ) -> reqwest::Result<Self> {
        let http = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            metrics,
            empty_hints: Arc::new(EmptyResponseHints::new()),
            hold_offs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn check_hold_off(&self, key: &str) -> Result<()> {
        let hold_offs = self.hold_offs.lock().await;
        if let Some(until) = hold_offs.get(key) {
            let now = Instant::now();
            if *until > now {
                return Err(UpstreamError::RateLimited {
                    retry_after_secs: (*until - now).as_secs(),
                });
            }
        }
        Ok(())
    }

    async fn record_rate_limit_headers(&self, key: &str, response: &Response) {
        let remaining = header_as_i64(response, "x-ratelimit-remaining");
        let reset = header_as_i64(response, "x-ratelimit-reset");

        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            if remaining <= RATE_LIMIT_REMAINING_FLOOR {
                let mut hold_offs = self.hold_offs.lock().await;
                hold_offs.insert(key.to_string(), Instant::now() + Duration::from_secs(reset.max(0) as u64));
                self.metrics.incr("reddit.api.ratelimit", &[("account", key)]);
            }
        }
    }

    /// One HTTP call, with the retry/back-off policy applied: timeouts,
    /// transport errors, and 5xx responses retry up to 3x; everything
    /// else (including rate limiting) returns immediately.
    async fn send_with_retry(
        &self,
        endpoint: &'static str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Response> {
        let mut last_err = None;

        for (attempt, backoff) in std::iter::once(None)
            .chain(RETRY_BACKOFFS.into_iter().map(Some))
            .enumerate()
        {
            if let Some(backoff) = backoff {
                sleep(backoff).await;
            }

            let start = Instant::now();
            let result = build().send().await;
            let elapsed = start.elapsed();
            self.metrics.histogram("reddit.api.latency_ms", elapsed, &[("endpoint", endpoint)]);

            match result {
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status();
                    warn!(attempt, %status, "upstream server error, retrying");
                    last_err = Some(UpstreamError::ServerError {
                        status: status.as_u16(),
                        body: String::new(),
                    });
                    continue;
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    last_err = Some(UpstreamError::Timeout);
                    continue;
                }
                Err(e) => {
                    last_err = Some(UpstreamError::Transport(e.to_string()));
                    continue;
                }
            }
        }

        self.metrics.incr("reddit.api.errors", &[("endpoint", endpoint)]);
        Err(last_err.unwrap_or(UpstreamError::Transport("exhausted retries".into())))
    }

    async fn map_error_response(&self, response: Response, auth: EndpointAuth) -> UpstreamError {
        let status = response.status();

        if matches!(auth, EndpointAuth::UnauthenticatedSubreddit) {
            match status {
                StatusCode::NOT_FOUND => return UpstreamError::SubredditNotFound,
                StatusCode::FORBIDDEN => {
                    let body = response.text().await.unwrap_or_default();
                    return match subreddit_block_reason(&body).as_deref() {
                        Some("quarantined") => UpstreamError::SubredditIsQuarantined,
                        _ => UpstreamError::SubredditIsPrivate,
                    };
                }
                _ => {}
            }
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if auth.is_authenticated() => {
                UpstreamError::OAuthRevoked
            }
            StatusCode::NOT_FOUND => UpstreamError::SubredditNotFound,
            _ => {
                let body = response.text().await.unwrap_or_default();
                UpstreamError::ServerError {
                    status: status.as_u16(),
                    body,
                }
            }
        }
    }

    async fn parse_json<T: DeserializeOwned>(&self, response: Response, auth: EndpointAuth) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.map_error_response(response, auth).await);
        }

        let body = response.text().await.map_err(|e| UpstreamError::Transport(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| UpstreamError::Transport(e.to_string()))
    }

    /// Listing-shaped responses (inbox pages, post/comment pages) get the
    /// empty-response optimization: when the body length matches one of the
    /// registered `empty_response_bytes` hints exactly, a canonical empty
    /// `Vec` is returned without ever reaching `serde_json`.
    async fn parse_listing<T: DeserializeOwned>(
        &self,
        response: Response,
        auth: EndpointAuth,
    ) -> Result<Vec<T>> {
        if !response.status().is_success() {
            return Err(self.map_error_response(response, auth).await);
        }

        let body = response.text().await.map_err(|e| UpstreamError::Transport(e.to_string()))?;

        if self.empty_hints.matches(body.len()) {
            debug!(len = body.len(), "empty-response optimization hit");
            return Ok(Vec::new());
        }

        serde_json::from_str(&body).map_err(|e| UpstreamError::Transport(e.to_string()))
    }
}

/// Distinguishes call sites that carry an account's OAuth credentials from
/// the handful that hit a subreddit's or user's public JSON endpoints with
/// no token at all — those have no OAuth to revoke, so a 401/403 there means
/// something else entirely.
#[derive(Clone, Copy, PartialEq, Eq)]
enum EndpointAuth {
    Authenticated,
    UnauthenticatedSubreddit,
    UnauthenticatedOther,
}

impl EndpointAuth {
    fn is_authenticated(self) -> bool {
        matches!(self, EndpointAuth::Authenticated)
    }
}

/// The social API reports a private or quarantined subreddit as a 403 body
/// shaped like `{"reason": "private"}` / `{"reason": "quarantined"}`. Falls
/// back to `None` for anything else, which callers treat as plain-private.
fn subreddit_block_reason(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("reason")?
        .as_str()
        .map(str::to_string)
}

fn header_as_i64(response: &Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .parse::<f64>()
        .ok()
        .map(|v| v as i64)
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn subreddit_about(&self, name: &str) -> Result<SubredditAbout> {
        let url = format!("{}/r/{}/about.json", self.base_url, name);
        let response = self.send_with_retry("subreddit_about", || self.http.get(&url)).await?;
        self.parse_json(response, EndpointAuth::UnauthenticatedSubreddit).await
    }

    async fn subreddit_listing(
        &self,
        name: &str,
        sort: ListingSort,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Post>> {
        let sort_path = match sort {
            ListingSort::Hot => "hot",
            ListingSort::Top => "top",
            ListingSort::New => "new",
        };
        let url = format!("{}/r/{}/{}.json", self.base_url, name, sort_path);
        let after = after.map(str::to_string);
        let response = self
            .send_with_retry("subreddit_listing", || {
                let mut req = self.http.get(&url).query(&[("limit", limit.to_string())]);
                if let Some(after) = &after {
                    req = req.query(&[("after", after)]);
                }
                req
            })
            .await?;
        self.parse_listing(response, EndpointAuth::UnauthenticatedSubreddit).await
    }

    async fn user_about(&self, name: &str) -> Result<UserAbout> {
        let url = format!("{}/user/{}/about.json", self.base_url, name);
        let response = self.send_with_retry("user_about", || self.http.get(&url)).await?;
        self.parse_json(response, EndpointAuth::UnauthenticatedOther).await
    }

    async fn refresh_tokens(&self, creds: &Credentials) -> Result<RefreshedTokens> {
        let url = format!("{}/api/v1/access_token", self.base_url);
        let response = self
            .send_with_retry("refresh_tokens", || {
                self.http
                    .post(&url)
                    .basic_auth(&self.client_id, Some(&self.client_secret))
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("refresh_token", &creds.refresh_token),
                    ])
            })
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            return Err(UpstreamError::OAuthRevoked);
        }

        self.parse_json(response, EndpointAuth::Authenticated).await
    }

    async fn message_inbox(&self, creds: &Credentials) -> Result<Vec<InboxItem>> {
        self.check_hold_off(&creds.remote_account_id).await?;
        let url = format!("{}/message/inbox.json", self.base_url);
        let response = self
            .send_with_retry("message_inbox", || self.http.get(&url).bearer_auth(&creds.access_token))
            .await?;
        self.record_rate_limit_headers(&creds.remote_account_id, &response).await;
        self.parse_listing(response, EndpointAuth::Authenticated).await
    }

    async fn message_unread(&self, creds: &Credentials) -> Result<Vec<InboxItem>> {
        self.check_hold_off(&creds.remote_account_id).await?;
        let url = format!("{}/message/unread.json", self.base_url);
        let response = self
            .send_with_retry("message_unread", || self.http.get(&url).bearer_auth(&creds.access_token))
            .await?;
        self.record_rate_limit_headers(&creds.remote_account_id, &response).await;
        self.parse_listing(response, EndpointAuth::Authenticated).await
    }

    async fn about_info(&self, creds: &Credentials, full_name: &str) -> Result<Option<InboxItem>> {
        self.check_hold_off(&creds.remote_account_id).await?;
        let url = format!("{}/api/info.json", self.base_url);
        let full_name = full_name.to_string();
        let response = self
            .send_with_retry("about_info", || {
                self.http
                    .get(&url)
                    .bearer_auth(&creds.access_token)
                    .query(&[("id", &full_name)])
            })
            .await?;
        self.record_rate_limit_headers(&creds.remote_account_id, &response).await;
        let items: Vec<InboxItem> = self.parse_listing(response, EndpointAuth::Authenticated).await?;
        Ok(items.into_iter().next())
    }

    async fn user_posts(&self, creds: &Credentials, name: &str) -> Result<Vec<Post>> {
        self.check_hold_off(&creds.remote_account_id).await?;
        let url = format!("{}/user/{}/submitted.json", self.base_url, name);
        let response = self
            .send_with_retry("user_posts", || self.http.get(&url).bearer_auth(&creds.access_token))
            .await?;
        self.record_rate_limit_headers(&creds.remote_account_id, &response).await;
        self.parse_listing(response, EndpointAuth::Authenticated).await
    }

    async fn top_level_comments(
        &self,
        creds: &Credentials,
        subreddit: &str,
        thread_id: &str,
    ) -> Result<Vec<Comment>> {
        self.check_hold_off(&creds.remote_account_id).await?;
        let url = format!("{}/r/{}/comments/{}.json", self.base_url, subreddit, thread_id);
        let response = self
            .send_with_retry("top_level_comments", || self.http.get(&url).bearer_auth(&creds.access_token))
            .await?;
        self.record_rate_limit_headers(&creds.remote_account_id, &response).await;
        self.parse_listing(response, EndpointAuth::Authenticated).await
    }
}
