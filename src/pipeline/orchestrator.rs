//! Pipeline orchestrator: per-market ingest → score → compute → snapshot,
//! plus the bulk tick over all active markets.
//!
//! Ingest and scoring failures are recorded in the tick report but never
//! prevent the compute stage; the engine always runs when outcomes exist.

use crate::adapters::{PostSource, PostgresStore, ScoringOracle};
use crate::config::PipelineConfig;
use crate::domain::{Market, MarketState, ProbabilitySnapshot, RawPost, ScoredPost};
use crate::engine::{self, EngineReport, EvidencePost, OutcomeDef};
use crate::error::{PulseError, Result};
use crate::pipeline::ingest::IngestDispatcher;
use crate::pipeline::rules::{RuleSynchronizer, SyncReport};
use crate::pipeline::scoring::ScoringDispatcher;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Overall tick result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Success,
    Partial,
    Error,
}

/// Per-tick result object surfaced to entry-point callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshReport {
    pub tick_id: String,
    pub status: RefreshStatus,
    pub market_id: String,
    pub tweets_fetched: u32,
    pub tweets_ingested: u32,
    pub posts_scored: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<BTreeMap<String, f64>>,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

/// Fold raw posts and their scored rows into engine input. Posts without any
/// scored rows are omitted; the engine only weighs scored evidence.
pub fn build_engine_input(posts: &[RawPost], scored: &[ScoredPost]) -> Vec<EvidencePost> {
    let mut by_post: HashMap<i64, HashMap<String, crate::domain::OutcomeScores>> = HashMap::new();
    for row in scored {
        by_post
            .entry(row.raw_post_id)
            .or_default()
            .insert(row.outcome_key.clone(), row.scores);
    }

    posts
        .iter()
        .filter_map(|p| {
            let id = p.id?;
            let scores = by_post.remove(&id)?;
            Some(EvidencePost {
                author_id: p.author_id.clone(),
                created_at_ms: p.post_created_at.timestamp_millis(),
                author_followers: p.author_followers,
                author_verified: p.author_verified.unwrap_or(false),
                metrics: p.metrics,
                features: p.features,
                scores,
            })
        })
        .collect()
}

/// Sequences the pipeline stages for each market
pub struct Orchestrator {
    store: PostgresStore,
    source: Box<dyn PostSource>,
    oracle: Box<dyn ScoringOracle>,
    cfg: PipelineConfig,
    language: Option<String>,
}

impl Orchestrator {
    pub fn new(
        store: PostgresStore,
        source: Box<dyn PostSource>,
        oracle: Box<dyn ScoringOracle>,
        cfg: PipelineConfig,
        language: Option<String>,
    ) -> Self {
        Self {
            store,
            source,
            oracle,
            cfg,
            language,
        }
    }

    pub fn store(&self) -> &PostgresStore {
        &self.store
    }

    /// One full refresh tick for a market.
    ///
    /// NotFound / Inactive / RateLimited abort before any stage runs; after
    /// that, stage errors are collected and the compute stage still runs.
    pub async fn refresh(&self, market_id: &str) -> Result<RefreshReport> {
        let started = Instant::now();
        let tick_id = Uuid::new_v4().to_string();

        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| PulseError::MarketNotFound(market_id.to_string()))?;

        if !market.status.is_active() {
            return Err(PulseError::MarketInactive {
                market_id: market_id.to_string(),
                status: market.status.to_string(),
            });
        }

        // Local rate guard: a recent productive run means this tick can wait.
        if let Some(state) = self.store.get_market_state(market_id).await? {
            let elapsed_ms = (Utc::now() - state.updated_at).num_milliseconds();
            if elapsed_ms >= 0
                && (elapsed_ms as u64) < self.cfg.min_refresh_interval_ms
                && state.accepted_post_count > 0
            {
                return Err(PulseError::RateLimited(format!(
                    "market {} refreshed {}ms ago",
                    market_id, elapsed_ms
                )));
            }
        }

        let mut errors = Vec::new();
        let mut tweets_fetched = 0;
        let mut tweets_ingested = 0;
        let mut posts_scored = 0;

        // Stage 1: ingest
        let ingester = IngestDispatcher::new(&self.store, self.source.as_ref(), self.language.clone());
        match ingester
            .ingest_for_market(&market, self.cfg.ingest_batch)
            .await
        {
            Ok(stats) => {
                tweets_fetched = stats.fetched;
                tweets_ingested = stats.ingested;
            }
            Err(e) => {
                warn!("ingest failed for {}: {}", market_id, e);
                errors.push(format!("ingest: {}", e));
            }
        }

        // Stage 2: score
        let outcomes = self.store.get_outcomes(market_id).await?;
        if outcomes.is_empty() {
            errors.push("score: market has no outcomes".to_string());
        } else {
            let scorer = ScoringDispatcher::new(&self.store, self.oracle.as_ref());
            match scorer
                .score_unscored(&market, &outcomes, self.cfg.score_batch)
                .await
            {
                Ok(n) => posts_scored = n,
                Err(e) => {
                    warn!("scoring failed for {}: {}", market_id, e);
                    errors.push(format!("score: {}", e));
                }
            }
        }

        // Stage 3: compute — always runs
        let now = Utc::now();
        let report = self.compute_market(&market, now.timestamp_millis()).await?;

        // Stage 4: persist state, snapshot, per-outcome probabilities
        let state = MarketState {
            market_id: market.id.clone(),
            probabilities: report.probabilities.clone(),
            updated_at: now,
            accepted_post_count: report.diagnostics.accepted_posts as i32,
        };
        self.store.upsert_market_state(&state).await?;
        self.store
            .append_snapshot(&ProbabilitySnapshot {
                market_id: market.id.clone(),
                timestamp: now,
                probabilities: report.probabilities.clone(),
            })
            .await?;
        for (key, p) in &report.probabilities {
            self.store
                .update_outcome_probability(&market.id, key, *p)
                .await?;
        }
        let total = self.store.count_raw_posts(&market.id).await?;
        self.store
            .set_total_posts_processed(&market.id, total)
            .await?;

        let status = if errors.is_empty() {
            RefreshStatus::Success
        } else {
            RefreshStatus::Partial
        };

        info!(
            "refresh market={} status={:?} fetched={} ingested={} scored={} accepted={}",
            market_id,
            status,
            tweets_fetched,
            tweets_ingested,
            posts_scored,
            report.diagnostics.accepted_posts
        );

        Ok(RefreshReport {
            tick_id,
            status,
            market_id: market.id,
            tweets_fetched,
            tweets_ingested,
            posts_scored,
            probabilities: Some(report.probabilities),
            duration_ms: started.elapsed().as_millis() as u64,
            errors,
        })
    }

    /// Engine-only recompute from stored posts; no network, no persistence.
    pub async fn compute_market(&self, market: &Market, now_ms: i64) -> Result<EngineReport> {
        let outcomes = self.store.get_outcomes(&market.id).await?;
        let defs: Vec<OutcomeDef> = outcomes
            .iter()
            .map(|o| OutcomeDef {
                key: o.outcome_key.clone(),
                prior_probability: o.prior_probability,
            })
            .collect();

        let prev = self
            .store
            .get_market_state(&market.id)
            .await?
            .map(|s| s.probabilities);

        // Window from the engine clock, not the wall clock, so offline replay
        // with a fixed now_ms sees the same posts the engine will weigh.
        let now = chrono::DateTime::from_timestamp_millis(now_ms)
            .ok_or_else(|| PulseError::InvalidInput(format!("bad now_ms: {}", now_ms)))?;
        let cutoff = now - ChronoDuration::seconds(engine::evidence::MAX_AGE_SECS as i64);
        let raw_posts = self.store.recent_raw_posts(&market.id, cutoff).await?;
        let ids: Vec<i64> = raw_posts.iter().filter_map(|p| p.id).collect();
        let scored = self.store.scored_for_posts(&market.id, &ids).await?;
        let evidence = build_engine_input(&raw_posts, &scored);

        engine::compute(&market.id, now_ms, &defs, prev.as_ref(), &evidence)
    }

    /// Engine-only recompute by market id (offline replay entry point)
    pub async fn compute_by_id(&self, market_id: &str, now_ms: Option<i64>) -> Result<EngineReport> {
        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| PulseError::MarketNotFound(market_id.to_string()))?;
        let now_ms = now_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        self.compute_market(&market, now_ms).await
    }

    /// Bulk tick: sequential refresh over all active markets with a fixed
    /// inter-market delay; a 429 from the post source earns a longer cooldown.
    pub async fn refresh_all(&self) -> Result<Vec<RefreshReport>> {
        let markets = self.store.list_active_markets().await?;
        info!("refresh_all: {} active markets", markets.len());

        let mut reports = Vec::with_capacity(markets.len());
        let mut iter = markets.iter().peekable();

        while let Some(market) = iter.next() {
            match self.refresh(&market.id).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    let rate_limited = e.is_rate_limit();
                    warn!("refresh_all: market {} failed: {}", market.id, e);
                    reports.push(RefreshReport {
                        tick_id: Uuid::new_v4().to_string(),
                        status: RefreshStatus::Error,
                        market_id: market.id.clone(),
                        tweets_fetched: 0,
                        tweets_ingested: 0,
                        posts_scored: 0,
                        probabilities: None,
                        duration_ms: 0,
                        errors: vec![e.to_string()],
                    });
                    if rate_limited {
                        tokio::time::sleep(Duration::from_millis(self.cfg.rate_limit_cooldown_ms))
                            .await;
                    }
                }
            }

            if iter.peek().is_some() {
                tokio::time::sleep(Duration::from_millis(self.cfg.inter_market_delay_ms)).await;
            }
        }

        Ok(reports)
    }

    /// Reconcile filter rules with the post source
    pub async fn sync_rules(&self) -> Result<SyncReport> {
        RuleSynchronizer::new(&self.store, self.source.as_ref())
            .sync_rules()
            .await
    }
}
