use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subreddit {
    pub id: i64,
    pub remote_id: String,
    pub name: String,
    pub next_check_at: DateTime<Utc>,
}
