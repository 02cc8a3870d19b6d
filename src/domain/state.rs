use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current probability vector for a market (1:1 with Market)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub market_id: String,
    /// outcome_key -> probability; sums to 1 within tolerance
    pub probabilities: BTreeMap<String, f64>,
    pub updated_at: DateTime<Utc>,
    /// Posts accepted by the engine in the last run
    pub accepted_post_count: i32,
}

/// Append-only probability history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilitySnapshot {
    pub market_id: String,
    pub timestamp: DateTime<Utc>,
    pub probabilities: BTreeMap<String, f64>,
}

/// A filter rule registered against the post source on behalf of a market.
/// The rule tag always equals the market id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub market_id: String,
    pub external_rule_id: String,
    pub rule_value: String,
    pub rule_tag: String,
    pub created_at: DateTime<Utc>,
}
