//! Scoring dispatcher: batch unscored posts to the oracle and persist the
//! per-outcome results.

use crate::adapters::{
    OracleAuthor, OracleMarket, OracleMetrics, OracleOutcome, OraclePost, PostgresStore,
    ScoreRequest, ScoreResponse, ScoringOracle,
};
use crate::domain::{Market, Outcome, RawPost, ScoredPost};
use crate::error::{PulseError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Assemble the oracle request bundle for a batch of raw posts.
pub fn build_request(market: &Market, outcomes: &[Outcome], posts: &[RawPost]) -> ScoreRequest {
    ScoreRequest {
        market: OracleMarket {
            market_id: market.id.clone(),
            question: market.question.clone(),
            outcomes: outcomes
                .iter()
                .map(|o| OracleOutcome {
                    id: o.outcome_key.clone(),
                    label: o.label.clone(),
                })
                .collect(),
        },
        posts: posts
            .iter()
            .map(|p| OraclePost {
                post_id: p.external_post_id.clone(),
                created_at_ms: p.post_created_at.timestamp_millis(),
                text: p.text.clone(),
                author: OracleAuthor {
                    verified: p.author_verified,
                    followers: p.author_followers,
                    bio: None,
                },
                initial_metrics: match (
                    p.metrics.likes,
                    p.metrics.reposts,
                    p.metrics.replies,
                    p.metrics.quotes,
                ) {
                    (None, None, None, None) => None,
                    _ => Some(OracleMetrics {
                        likes: p.metrics.likes.unwrap_or(0),
                        reposts: p.metrics.reposts.unwrap_or(0),
                        replies: p.metrics.replies.unwrap_or(0),
                        quotes: p.metrics.quotes.unwrap_or(0),
                    }),
                },
            })
            .collect(),
    }
}

/// Expand oracle results into one scored row per market outcome.
///
/// Outcomes the oracle omitted get all-zero scores, which the engine reads as
/// no evidence; writing the row keeps the post out of the unscored set.
pub fn expand_results(
    market_id: &str,
    posts: &[RawPost],
    outcomes: &[Outcome],
    response: &ScoreResponse,
    scored_at: DateTime<Utc>,
) -> Result<Vec<ScoredPost>> {
    let mut rows = Vec::with_capacity(response.results.len() * outcomes.len());

    for result in &response.results {
        let raw_post_id = posts
            .iter()
            .find(|p| p.external_post_id == result.post_id)
            .and_then(|p| p.id)
            .ok_or_else(|| {
                PulseError::UpstreamOracle(format!(
                    "result for unknown or unpersisted post: {}",
                    result.post_id
                ))
            })?;

        for outcome in outcomes {
            let scores = result
                .per_outcome
                .get(&outcome.outcome_key)
                .copied()
                .unwrap_or_default();
            rows.push(ScoredPost {
                raw_post_id,
                market_id: market_id.to_string(),
                outcome_key: outcome.outcome_key.clone(),
                scores,
                flags: result.flags,
                labels: result.display_labels.clone(),
                scored_at,
            });
        }
    }
    Ok(rows)
}

/// Dispatches unscored posts to the oracle in bounded batches
pub struct ScoringDispatcher<'a> {
    store: &'a PostgresStore,
    oracle: &'a dyn ScoringOracle,
}

impl<'a> ScoringDispatcher<'a> {
    pub fn new(store: &'a PostgresStore, oracle: &'a dyn ScoringOracle) -> Self {
        Self { store, oracle }
    }

    /// Score up to `batch_size` unscored posts. Returns the number of posts
    /// scored. A schema-invalid oracle reply rejects the whole batch.
    pub async fn score_unscored(
        &self,
        market: &Market,
        outcomes: &[Outcome],
        batch_size: i64,
    ) -> Result<u32> {
        if outcomes.is_empty() {
            return Err(PulseError::InvalidInput(format!(
                "market {} has no outcomes to score against",
                market.id
            )));
        }

        let posts = self.store.unscored_posts(&market.id, batch_size).await?;
        if posts.is_empty() {
            debug!("no unscored posts for market {}", market.id);
            return Ok(0);
        }

        let request = build_request(market, outcomes, &posts);
        let response = self.oracle.score_batch(&request).await?;

        let rows = expand_results(&market.id, &posts, outcomes, &response, Utc::now())?;
        self.store.upsert_scored(&rows).await?;

        let scored = response.results.len() as u32;
        info!(
            "scored market={}: posts={} rows={}",
            market.id,
            scored,
            rows.len()
        );
        Ok(scored)
    }
}
