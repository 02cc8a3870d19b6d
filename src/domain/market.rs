use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Closed,
    Resolved,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MarketStatus::Active)
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MarketStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MarketStatus::Active),
            "closed" => Ok(MarketStatus::Closed),
            "resolved" => Ok(MarketStatus::Resolved),
            _ => Err(format!("Unknown market status: {}", s)),
        }
    }
}

/// A user question with a fixed set of mutually exclusive outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub normalized_question: String,
    pub status: MarketStatus,
    /// Opaque query strings consumed by the post source, in priority order
    pub filter_templates: Vec<String>,
    pub total_posts_processed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// Check that the ingest stage can do anything useful with this market
    pub fn is_processable(&self) -> bool {
        self.status.is_active() && !self.filter_templates.is_empty()
    }
}

/// One candidate answer within a market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub market_id: String,
    pub outcome_key: String,
    pub label: String,
    /// Optional prior in [1e-6, 1]; uniform 1/K when absent
    pub prior_probability: Option<f64>,
    pub current_probability: f64,
    pub sort_order: i32,
}
