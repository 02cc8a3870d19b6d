use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engagement metrics captured at ingest time
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PostMetrics {
    pub likes: Option<i64>,
    pub reposts: Option<i64>,
    pub replies: Option<i64>,
    pub quotes: Option<i64>,
}

/// Spam-signal features computed from raw post text at ingest; immutable after
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PostFeatures {
    /// Count of `$` followed by 1-5 uppercase letters
    pub cashtag_count: u32,
    /// Count of `@` followed by word characters
    pub mention_count: u32,
    /// Count of http(s):// URLs
    pub url_count: u32,
    /// Uppercase fraction of alphabetic chars after stripping URLs/mentions/cashtags
    pub caps_ratio: f64,
    pub is_reply: Option<bool>,
    pub is_quote: Option<bool>,
}

/// A post ingested for a specific market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    /// Store-assigned id; None until persisted
    pub id: Option<i64>,
    pub external_post_id: String,
    pub market_id: String,
    pub text: String,
    pub author_id: String,
    pub author_followers: Option<i64>,
    pub author_verified: Option<bool>,
    pub author_created_at: Option<DateTime<Utc>>,
    pub post_created_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub metrics: PostMetrics,
    pub features: PostFeatures,
    pub is_active: bool,
}

impl RawPost {
    /// Post age in seconds relative to `now_ms`, clamped at zero
    pub fn age_secs(&self, now_ms: i64) -> f64 {
        ((now_ms - self.post_created_at.timestamp_millis()) as f64 / 1000.0).max(0.0)
    }
}
