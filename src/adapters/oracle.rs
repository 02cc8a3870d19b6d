//! Scoring oracle client.
//!
//! Sends a market context plus a post batch to a chat-completions style LLM
//! endpoint and parses the reply into per-outcome score records. Shape
//! violations reject the whole batch; out-of-range floats are clamped, since
//! the oracle is not perfectly reliable.

use crate::domain::{DisplayLabels, OutcomeScores, PostFlags};
use crate::error::{PulseError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome descriptor sent to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleOutcome {
    pub id: String,
    pub label: String,
}

/// Market context sent to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleMarket {
    pub market_id: String,
    pub question: String,
    pub outcomes: Vec<OracleOutcome>,
}

/// Author metadata the oracle may weigh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleAuthor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Engagement snapshot forwarded to the oracle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OracleMetrics {
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub quotes: i64,
}

/// One post in the scoring request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OraclePost {
    pub post_id: String,
    pub created_at_ms: i64,
    pub text: String,
    pub author: OracleAuthor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_metrics: Option<OracleMetrics>,
}

/// Full request bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub market: OracleMarket,
    pub posts: Vec<OraclePost>,
}

/// Per-post scoring result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub post_id: String,
    /// outcome id -> scores; a missing key means zero relevance and stance
    pub per_outcome: HashMap<String, OutcomeScores>,
    pub flags: PostFlags,
    pub display_labels: DisplayLabels,
}

/// Full oracle response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub results: Vec<ScoreResult>,
}

/// Abstract scoring oracle seam
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn score_batch(&self, request: &ScoreRequest) -> Result<ScoreResponse>;
}

/// Validate a parsed response against the request: every result must refer to
/// a requested post, every per-outcome key must belong to the market, and all
/// float scores are clamped into their declared ranges.
pub fn validate_response(request: &ScoreRequest, mut response: ScoreResponse) -> Result<ScoreResponse> {
    let requested: HashSet<&str> = request.posts.iter().map(|p| p.post_id.as_str()).collect();
    let outcome_ids: HashSet<&str> = request
        .market
        .outcomes
        .iter()
        .map(|o| o.id.as_str())
        .collect();

    for result in &mut response.results {
        if !requested.contains(result.post_id.as_str()) {
            return Err(PulseError::UpstreamOracle(format!(
                "oracle returned unknown post_id: {}",
                result.post_id
            )));
        }
        for key in result.per_outcome.keys() {
            if !outcome_ids.contains(key.as_str()) {
                return Err(PulseError::UpstreamOracle(format!(
                    "oracle returned unknown outcome key '{}' for post {}",
                    key, result.post_id
                )));
            }
        }
        for scores in result.per_outcome.values_mut() {
            *scores = scores.clamped();
        }
    }
    Ok(response)
}

// ==================== LLM client ====================

/// Oracle endpoint configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 45,
        }
    }
}

impl OracleConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

const SYSTEM_PROMPT: &str = r#"You score social-media posts as evidence for prediction-market outcomes.

For every post in the input, produce one result object:
{"post_id": "...",
 "per_outcome": {"<outcome id>": {"relevance": 0..1, "stance": -1..1, "strength": 0..1, "credibility": 0..1, "confidence": 0..1}},
 "flags": {"is_sarcasm": bool, "is_question": bool, "is_quote": bool, "is_rumor_style": bool},
 "display_labels": {"summary": "...", "reason": "...", "credibility_label": "High"|"Medium"|"Low", "stance_label": "..."}}

Omit an outcome from per_outcome when the post says nothing about it.
Respond with a single JSON object: {"results": [...]}. No prose."#;

/// Chat-completions scoring oracle
pub struct LlmOracle {
    config: OracleConfig,
    http: Client,
}

impl LlmOracle {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PulseError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[async_trait]
impl ScoringOracle for LlmOracle {
    async fn score_batch(&self, request: &ScoreRequest) -> Result<ScoreResponse> {
        if !self.is_configured() {
            return Err(PulseError::UpstreamOracle(
                "oracle API key not configured".to_string(),
            ));
        }
        if request.posts.is_empty() {
            return Ok(ScoreResponse {
                results: Vec::new(),
            });
        }

        debug!(
            "scoring {} posts for market {}",
            request.posts.len(),
            request.market.market_id
        );

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: serde_json::to_string(request)?,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.endpoint))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("oracle error: {} - {}", status, text);
            return Err(PulseError::UpstreamOracle(format!("{} - {}", status, text)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PulseError::UpstreamOracle(format!("parse chat envelope: {}", e)))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| PulseError::UpstreamOracle("empty oracle response".to_string()))?;

        let parsed: ScoreResponse = serde_json::from_str(content)
            .map_err(|e| PulseError::UpstreamOracle(format!("schema-invalid payload: {}", e)))?;

        validate_response(request, parsed)
    }
}
