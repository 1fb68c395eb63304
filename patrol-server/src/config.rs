//! Environment-driven process configuration. One struct per process kind
//! would be tidier, but every subcommand needs nearly the same inputs
//! (store + lock/queue + upstream + push credentials), so `Config::load`
//! reads them all once and the subcommands pick what they need.

use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub redis_locks_url: String,
    pub redis_queue_url: String,
    pub reddit_base_url: String,
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub apple_key_path: String,
    pub apple_key_id: String,
    pub apple_team_id: String,
    pub apple_bundle_id: String,
    pub statsd_url: Option<String>,
    pub env: String,
    pub port: u16,
    pub bugsnag_api_key: Option<String>,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn optional_or(name: &'static str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Loads `.env` (if present, silently ignored if absent) then reads the
    /// process environment. `REDIS_LOCKS_URL`/`REDIS_QUEUE_URL` default to
    /// `REDIS_URL` when unset, per §6: "may coincide."
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let redis_url = required("REDIS_URL")?;
        let redis_locks_url = optional("REDIS_LOCKS_URL").unwrap_or_else(|| redis_url.clone());
        let redis_queue_url = optional("REDIS_QUEUE_URL").unwrap_or_else(|| redis_url.clone());

        let port = optional_or("PORT", "4000");
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidVar { name: "PORT", value: port })?;

        Ok(Self {
            database_url: required("DATABASE_CONNECTION_POOL_URL")?,
            redis_url,
            redis_locks_url,
            redis_queue_url,
            reddit_base_url: optional_or("REDDIT_BASE_URL", "https://oauth.reddit.com"),
            reddit_client_id: required("REDDIT_CLIENT_ID")?,
            reddit_client_secret: required("REDDIT_CLIENT_SECRET")?,
            apple_key_path: required("APPLE_KEY_PATH")?,
            apple_key_id: required("APPLE_KEY_ID")?,
            apple_team_id: required("APPLE_TEAM_ID")?,
            apple_bundle_id: required("APPLE_BUNDLE_ID")?,
            statsd_url: optional("STATSD_URL"),
            env: optional_or("ENV", "development"),
            port,
            bugsnag_api_key: optional("BUGSNAG_API_KEY"),
        })
    }
}
