//! Post source client (X API v2 shaped).
//!
//! Covers recent search plus filtered-stream rule management. The pipeline
//! only sees the `PostSource` trait so tests can substitute an in-memory
//! source.

use crate::error::{PulseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A filter rule as registered with the post source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRule {
    pub id: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A rule to register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub value: String,
    pub tag: String,
}

/// Author metadata attached to a candidate post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceAuthor {
    pub username: Option<String>,
    pub verified: Option<bool>,
    pub followers_count: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Engagement counts at fetch time
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub quotes: i64,
}

/// A candidate post returned by the source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePost {
    pub external_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_id: String,
    pub author: SourceAuthor,
    pub metrics: Option<SourceMetrics>,
}

/// Pagination metadata for a search page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMeta {
    pub newest_id: Option<String>,
    pub oldest_id: Option<String>,
    pub result_count: u32,
    pub next_token: Option<String>,
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub posts: Vec<SourcePost>,
    pub meta: SearchMeta,
}

/// Abstract post source: keyword search plus filtered-stream rule management
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn search_recent(
        &self,
        query: &str,
        max_results: u32,
        since_id: Option<&str>,
    ) -> Result<SearchPage>;

    async fn get_rules(&self) -> Result<Vec<SourceRule>>;

    async fn add_rules(&self, rules: &[RuleSpec]) -> Result<Vec<SourceRule>>;

    async fn delete_rules(&self, ids: &[String]) -> Result<()>;
}

// ==================== Wire DTOs ====================

#[derive(Debug, Deserialize)]
struct WirePublicMetrics {
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    retweet_count: i64,
    #[serde(default)]
    reply_count: i64,
    #[serde(default)]
    quote_count: i64,
}

#[derive(Debug, Deserialize)]
struct WireTweet {
    id: String,
    text: String,
    created_at: DateTime<Utc>,
    author_id: String,
    public_metrics: Option<WirePublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct WireUserMetrics {
    #[serde(default)]
    followers_count: i64,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: Option<String>,
    verified: Option<bool>,
    created_at: Option<DateTime<Utc>>,
    public_metrics: Option<WireUserMetrics>,
}

#[derive(Debug, Default, Deserialize)]
struct WireIncludes {
    #[serde(default)]
    users: Vec<WireUser>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSearchMeta {
    newest_id: Option<String>,
    oldest_id: Option<String>,
    #[serde(default)]
    result_count: u32,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSearchResponse {
    #[serde(default)]
    data: Vec<WireTweet>,
    #[serde(default)]
    includes: WireIncludes,
    #[serde(default)]
    meta: WireSearchMeta,
}

#[derive(Debug, Deserialize)]
struct WireRule {
    id: String,
    value: String,
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRulesResponse {
    #[serde(default)]
    data: Vec<WireRule>,
}

#[derive(Debug, Serialize)]
struct WireAddRules<'a> {
    add: &'a [RuleSpec],
}

#[derive(Debug, Serialize)]
struct WireDeleteRules<'a> {
    delete: WireDeleteIds<'a>,
}

#[derive(Debug, Serialize)]
struct WireDeleteIds<'a> {
    ids: &'a [String],
}

// ==================== Client ====================

/// X API v2 client configuration
#[derive(Debug, Clone)]
pub struct XApiConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub timeout_secs: u64,
}

impl Default for XApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
            bearer_token: String::new(),
            timeout_secs: 15,
        }
    }
}

/// HTTP client for the X API v2 recent-search and stream-rules endpoints
pub struct XApiClient {
    config: XApiConfig,
    http: Client,
}

impl XApiClient {
    pub fn new(config: XApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PulseError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.bearer_token.is_empty()
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.bearer_token)
    }

    /// Map a non-success status to the error taxonomy; 429 is distinct so the
    /// orchestrator can back off.
    async fn fail(&self, context: &str, response: reqwest::Response) -> PulseError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!("{} failed: {} - {}", context, status, body);
        if status == StatusCode::TOO_MANY_REQUESTS {
            PulseError::RateLimited(format!("{}: {}", context, status))
        } else {
            PulseError::UpstreamPostSource(format!("{}: {} - {}", context, status, body))
        }
    }

    /// Open the long-lived filtered stream. The caller owns reconnects.
    pub async fn open_stream(&self) -> Result<reqwest::Response> {
        // No client-side timeout here: the stream is expected to stay open.
        let client = Client::builder()
            .build()
            .map_err(|e| PulseError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        let response = client
            .get(format!("{}/2/tweets/search/stream", self.config.base_url))
            .header("Authorization", self.auth_header())
            .query(&[
                ("tweet.fields", "created_at,public_metrics,author_id"),
                ("expansions", "author_id"),
                ("user.fields", "public_metrics,verified,created_at"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail("open stream", response).await);
        }
        Ok(response)
    }
}

fn convert_page(wire: WireSearchResponse) -> SearchPage {
    let users = wire.includes.users;
    let posts = wire
        .data
        .into_iter()
        .map(|t| {
            let author = users
                .iter()
                .find(|u| u.id == t.author_id)
                .map(|u| SourceAuthor {
                    username: u.username.clone(),
                    verified: u.verified,
                    followers_count: u.public_metrics.as_ref().map(|m| m.followers_count),
                    created_at: u.created_at,
                })
                .unwrap_or_default();
            let metrics = t.public_metrics.map(|m| SourceMetrics {
                likes: m.like_count,
                reposts: m.retweet_count,
                replies: m.reply_count,
                quotes: m.quote_count,
            });
            SourcePost {
                external_id: t.id,
                text: t.text,
                created_at: t.created_at,
                author_id: t.author_id,
                author,
                metrics,
            }
        })
        .collect();

    SearchPage {
        posts,
        meta: SearchMeta {
            newest_id: wire.meta.newest_id,
            oldest_id: wire.meta.oldest_id,
            result_count: wire.meta.result_count,
            next_token: wire.meta.next_token,
        },
    }
}

/// A post delivered by the filtered stream, routed by the tags of the rules
/// it matched (tags are market ids).
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub post: SourcePost,
    pub market_tags: Vec<String>,
}

/// Parse one line of the filtered stream (keep-alive lines are None)
pub fn parse_stream_line(line: &str) -> Result<Option<StreamEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    #[derive(Deserialize)]
    struct WireMatchingRule {
        #[allow(dead_code)]
        id: Option<String>,
        tag: Option<String>,
    }

    #[derive(Deserialize)]
    struct StreamEnvelope {
        data: WireTweet,
        #[serde(default)]
        includes: WireIncludes,
        #[serde(default)]
        matching_rules: Vec<WireMatchingRule>,
    }

    let envelope: StreamEnvelope = serde_json::from_str(trimmed)?;
    let market_tags = envelope
        .matching_rules
        .iter()
        .filter_map(|r| r.tag.clone())
        .collect();
    let page = convert_page(WireSearchResponse {
        data: vec![envelope.data],
        includes: envelope.includes,
        meta: WireSearchMeta::default(),
    });
    Ok(page.posts.into_iter().next().map(|post| StreamEvent {
        post,
        market_tags,
    }))
}

#[async_trait]
impl PostSource for XApiClient {
    async fn search_recent(
        &self,
        query: &str,
        max_results: u32,
        since_id: Option<&str>,
    ) -> Result<SearchPage> {
        // The endpoint rejects max_results outside [10, 100]
        let capped = max_results.clamp(10, 100).to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("query", query),
            ("max_results", &capped),
            ("tweet.fields", "created_at,public_metrics,author_id"),
            ("expansions", "author_id"),
            ("user.fields", "public_metrics,verified,created_at"),
        ];
        if let Some(id) = since_id {
            params.push(("since_id", id));
        }

        debug!("search_recent: query='{}' since_id={:?}", query, since_id);

        let response = self
            .http
            .get(format!("{}/2/tweets/search/recent", self.config.base_url))
            .header("Authorization", self.auth_header())
            .query(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail("search recent", response).await);
        }

        let wire: WireSearchResponse = response
            .json()
            .await
            .map_err(|e| PulseError::UpstreamPostSource(format!("parse search response: {}", e)))?;
        Ok(convert_page(wire))
    }

    async fn get_rules(&self) -> Result<Vec<SourceRule>> {
        let response = self
            .http
            .get(format!(
                "{}/2/tweets/search/stream/rules",
                self.config.base_url
            ))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail("get rules", response).await);
        }

        let wire: WireRulesResponse = response
            .json()
            .await
            .map_err(|e| PulseError::UpstreamPostSource(format!("parse rules response: {}", e)))?;
        Ok(wire
            .data
            .into_iter()
            .map(|r| SourceRule {
                id: r.id,
                value: r.value,
                tag: r.tag,
            })
            .collect())
    }

    async fn add_rules(&self, rules: &[RuleSpec]) -> Result<Vec<SourceRule>> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(format!(
                "{}/2/tweets/search/stream/rules",
                self.config.base_url
            ))
            .header("Authorization", self.auth_header())
            .json(&WireAddRules { add: rules })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail("add rules", response).await);
        }

        let wire: WireRulesResponse = response
            .json()
            .await
            .map_err(|e| PulseError::UpstreamPostSource(format!("parse add-rules response: {}", e)))?;
        Ok(wire
            .data
            .into_iter()
            .map(|r| SourceRule {
                id: r.id,
                value: r.value,
                tag: r.tag,
            })
            .collect())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .post(format!(
                "{}/2/tweets/search/stream/rules",
                self.config.base_url
            ))
            .header("Authorization", self.auth_header())
            .json(&WireDeleteRules {
                delete: WireDeleteIds { ids },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.fail("delete rules", response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_page_joins_authors() {
        let raw = r#"{
            "data": [{
                "id": "123",
                "text": "hello",
                "created_at": "2026-01-02T03:04:05Z",
                "author_id": "u1",
                "public_metrics": {"like_count": 3, "retweet_count": 1, "reply_count": 0, "quote_count": 2}
            }],
            "includes": {"users": [{
                "id": "u1",
                "username": "alice",
                "verified": true,
                "created_at": "2020-05-06T00:00:00Z",
                "public_metrics": {"followers_count": 4200}
            }]},
            "meta": {"newest_id": "123", "oldest_id": "123", "result_count": 1}
        }"#;

        let wire: WireSearchResponse = serde_json::from_str(raw).unwrap();
        let page = convert_page(wire);
        assert_eq!(page.posts.len(), 1);
        let post = &page.posts[0];
        assert_eq!(post.external_id, "123");
        assert_eq!(post.author.username.as_deref(), Some("alice"));
        assert_eq!(post.author.followers_count, Some(4200));
        assert_eq!(post.author.verified, Some(true));
        assert_eq!(post.metrics.unwrap().quotes, 2);
        assert_eq!(page.meta.newest_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_convert_page_missing_author() {
        let raw = r#"{
            "data": [{"id": "1", "text": "x", "created_at": "2026-01-02T03:04:05Z", "author_id": "ghost"}],
            "meta": {"result_count": 1}
        }"#;
        let wire: WireSearchResponse = serde_json::from_str(raw).unwrap();
        let page = convert_page(wire);
        assert!(page.posts[0].author.followers_count.is_none());
        assert!(page.posts[0].metrics.is_none());
    }

    #[test]
    fn test_parse_stream_line_keepalive() {
        assert!(parse_stream_line("\r\n").unwrap().is_none());
        assert!(parse_stream_line("").unwrap().is_none());
    }

    #[test]
    fn test_parse_stream_line_post() {
        let line = r#"{"data": {"id": "9", "text": "live", "created_at": "2026-01-02T03:04:05Z", "author_id": "u2"},
                       "matching_rules": [{"id": "r1", "tag": "m1"}, {"id": "r2", "tag": "m2"}]}"#;
        let event = parse_stream_line(line).unwrap().unwrap();
        assert_eq!(event.post.external_id, "9");
        assert_eq!(event.post.author_id, "u2");
        assert_eq!(event.market_tags, vec!["m1", "m2"]);
    }

    #[test]
    fn test_parse_stream_line_garbage_is_error() {
        assert!(parse_stream_line("not json").is_err());
    }
}
