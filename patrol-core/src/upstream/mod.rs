//! Abstract client for the polled social service: an authenticated
//! surface (per-account OAuth) plus an unauthenticated one, with a closed
//! error taxonomy workers match on directly rather than inspecting HTTP
//! status codes themselves.

mod reqwest_client;

pub use reqwest_client::ReqwestUpstreamClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced to workers by [`UpstreamClient`]. Every variant maps to
/// a specific worker-side recovery action (§4.3 step 7 / §7 error table) —
/// none of it is a generic "HTTP failed".
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// 401/403 on an authenticated call, or 400 on token refresh. Terminal
    /// for the account or live-activity this tick.
    #[error("oauth token revoked")]
    OAuthRevoked,

    /// The client is inside its own hold-off window for this key; the
    /// caller did not even attempt the request.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("subreddit is private")]
    SubredditIsPrivate,

    #[error("subreddit is quarantined")]
    SubredditIsQuarantined,

    #[error("subreddit not found")]
    SubredditNotFound,

    #[error("request timed out")]
    Timeout,

    #[error("upstream server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    /// Errors retried up to 3x with back-offs `{4s, 8s, 16s}` inside the
    /// client itself, before ever reaching a worker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout | UpstreamError::ServerError { .. } | UpstreamError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingSort {
    Hot,
    Top,
    New,
}

/// A post, normalized just enough for watcher matching and payload
/// construction — not a full mirror of the upstream wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub author: String,
    pub subreddit: String,
    pub domain: String,
    pub flair: Option<String>,
    pub score: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
    pub over_18: bool,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

/// An inbox item (comment reply, post reply, username mention, or private
/// message) as delivered to the notifications/stuck-notifications workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxItem {
    pub full_name: String,
    pub kind: InboxItemKind,
    pub author: String,
    pub subject: String,
    pub body: String,
    pub context: String,
    pub subreddit: Option<String>,
    pub was_comment: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxItemKind {
    CommentReply,
    PostReply,
    UsernameMention,
    PrivateMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditAbout {
    pub name: String,
    pub is_private: bool,
    pub is_quarantined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAbout {
    pub name: String,
    pub accepts_followers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

/// Per-account (or token-holding) credentials passed into every
/// authenticated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub remote_account_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn subreddit_about(&self, name: &str) -> Result<SubredditAbout>;
    async fn subreddit_listing(
        &self,
        name: &str,
        sort: ListingSort,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Post>>;
    async fn user_about(&self, name: &str) -> Result<UserAbout>;

    async fn refresh_tokens(&self, creds: &Credentials) -> Result<RefreshedTokens>;
    async fn message_inbox(&self, creds: &Credentials) -> Result<Vec<InboxItem>>;
    async fn message_unread(&self, creds: &Credentials) -> Result<Vec<InboxItem>>;
    async fn about_info(&self, creds: &Credentials, full_name: &str) -> Result<Option<InboxItem>>;
    async fn user_posts(&self, creds: &Credentials, name: &str) -> Result<Vec<Post>>;
    async fn top_level_comments(
        &self,
        creds: &Credentials,
        subreddit: &str,
        thread_id: &str,
    ) -> Result<Vec<Comment>>;
}
