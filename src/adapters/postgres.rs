//! PostgreSQL score store.
//!
//! All writes are idempotent upserts on natural keys: raw posts ignore
//! conflicts, scored rows and market state replace. Idempotence is what lets
//! the pipeline re-run any stage without rollback machinery.

use crate::domain::{
    FilterRule, Market, MarketState, MarketStatus, Outcome, PostFeatures, PostMetrics,
    ProbabilitySnapshot, RawPost, ScoredPost,
};
use crate::error::{PulseError, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Markets ====================

    pub async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        let row = sqlx::query(
            r#"
            SELECT id, question, normalized_question, status, filter_templates,
                   total_posts_processed, created_at, updated_at
            FROM markets WHERE id = $1
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(market_from_row).transpose()
    }

    pub async fn list_active_markets(&self) -> Result<Vec<Market>> {
        let rows = sqlx::query(
            r#"
            SELECT id, question, normalized_question, status, filter_templates,
                   total_posts_processed, created_at, updated_at
            FROM markets
            WHERE status = 'active'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(market_from_row).collect()
    }

    pub async fn set_total_posts_processed(&self, market_id: &str, count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE markets SET total_posts_processed = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(count)
        .bind(market_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Outcomes ====================

    pub async fn get_outcomes(&self, market_id: &str) -> Result<Vec<Outcome>> {
        let rows = sqlx::query(
            r#"
            SELECT market_id, outcome_key, label, prior_probability,
                   current_probability, sort_order
            FROM outcomes
            WHERE market_id = $1
            ORDER BY sort_order ASC, outcome_key ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Outcome {
                market_id: r.get("market_id"),
                outcome_key: r.get("outcome_key"),
                label: r.get("label"),
                prior_probability: r.get("prior_probability"),
                current_probability: r.get("current_probability"),
                sort_order: r.get("sort_order"),
            })
            .collect())
    }

    pub async fn update_outcome_probability(
        &self,
        market_id: &str,
        outcome_key: &str,
        probability: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outcomes SET current_probability = $1
            WHERE market_id = $2 AND outcome_key = $3
            "#,
        )
        .bind(probability)
        .bind(market_id)
        .bind(outcome_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Raw posts ====================

    /// Insert a raw post; returns true when a new row was created.
    /// Conflicts on (external_post_id, market_id) are ignored.
    #[instrument(skip(self, post), fields(market_id = %post.market_id))]
    pub async fn upsert_raw_post(&self, post: &RawPost) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_posts (
                external_post_id, market_id, text, author_id,
                author_followers, author_verified, author_created_at,
                post_created_at, ingested_at,
                likes, reposts, replies, quotes,
                cashtag_count, mention_count, url_count, caps_ratio,
                is_reply, is_quote, is_active
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
            ON CONFLICT (external_post_id, market_id) DO NOTHING
            "#,
        )
        .bind(&post.external_post_id)
        .bind(&post.market_id)
        .bind(&post.text)
        .bind(&post.author_id)
        .bind(post.author_followers)
        .bind(post.author_verified)
        .bind(post.author_created_at)
        .bind(post.post_created_at)
        .bind(post.ingested_at)
        .bind(post.metrics.likes)
        .bind(post.metrics.reposts)
        .bind(post.metrics.replies)
        .bind(post.metrics.quotes)
        .bind(post.features.cashtag_count as i32)
        .bind(post.features.mention_count as i32)
        .bind(post.features.url_count as i32)
        .bind(post.features.caps_ratio)
        .bind(post.features.is_reply)
        .bind(post.features.is_quote)
        .bind(post.is_active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest previously-ingested external post id for a market (ingest watermark)
    pub async fn latest_external_post_id(&self, market_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT external_post_id FROM raw_posts
            WHERE market_id = $1
            ORDER BY post_created_at DESC, external_post_id DESC
            LIMIT 1
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("external_post_id")))
    }

    /// Raw posts for a market created after `cutoff` (the engine window)
    pub async fn recent_raw_posts(
        &self,
        market_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RawPost>> {
        let rows = sqlx::query(
            r#"
            SELECT id, external_post_id, market_id, text, author_id,
                   author_followers, author_verified, author_created_at,
                   post_created_at, ingested_at,
                   likes, reposts, replies, quotes,
                   cashtag_count, mention_count, url_count, caps_ratio,
                   is_reply, is_quote, is_active
            FROM raw_posts
            WHERE market_id = $1 AND post_created_at >= $2 AND is_active
            ORDER BY post_created_at DESC
            "#,
        )
        .bind(market_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(raw_post_from_row).collect())
    }

    pub async fn count_raw_posts(&self, market_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM raw_posts WHERE market_id = $1")
            .bind(market_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Raw posts with no scored rows yet, most recently ingested first
    pub async fn unscored_posts(&self, market_id: &str, limit: i64) -> Result<Vec<RawPost>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.external_post_id, r.market_id, r.text, r.author_id,
                   r.author_followers, r.author_verified, r.author_created_at,
                   r.post_created_at, r.ingested_at,
                   r.likes, r.reposts, r.replies, r.quotes,
                   r.cashtag_count, r.mention_count, r.url_count, r.caps_ratio,
                   r.is_reply, r.is_quote, r.is_active
            FROM raw_posts r
            WHERE r.market_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM scored_posts s
                  WHERE s.raw_post_id = r.id AND s.market_id = r.market_id
              )
            ORDER BY r.ingested_at DESC
            LIMIT $2
            "#,
        )
        .bind(market_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(raw_post_from_row).collect())
    }

    // ==================== Scored posts ====================

    /// Upsert scored rows; conflicts on (raw_post_id, market_id, outcome_key)
    /// replace, so re-scoring is safe.
    pub async fn upsert_scored(&self, rows: &[ScoredPost]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for scored in rows {
            sqlx::query(
                r#"
                INSERT INTO scored_posts (
                    raw_post_id, market_id, outcome_key,
                    relevance, stance, strength, credibility, confidence,
                    is_sarcasm, is_question, is_quote, is_rumor_style,
                    summary, reason, credibility_label, stance_label, scored_at
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
                ON CONFLICT (raw_post_id, market_id, outcome_key) DO UPDATE SET
                    relevance = EXCLUDED.relevance,
                    stance = EXCLUDED.stance,
                    strength = EXCLUDED.strength,
                    credibility = EXCLUDED.credibility,
                    confidence = EXCLUDED.confidence,
                    is_sarcasm = EXCLUDED.is_sarcasm,
                    is_question = EXCLUDED.is_question,
                    is_quote = EXCLUDED.is_quote,
                    is_rumor_style = EXCLUDED.is_rumor_style,
                    summary = EXCLUDED.summary,
                    reason = EXCLUDED.reason,
                    credibility_label = EXCLUDED.credibility_label,
                    stance_label = EXCLUDED.stance_label,
                    scored_at = EXCLUDED.scored_at
                "#,
            )
            .bind(scored.raw_post_id)
            .bind(&scored.market_id)
            .bind(&scored.outcome_key)
            .bind(scored.scores.relevance)
            .bind(scored.scores.stance)
            .bind(scored.scores.strength)
            .bind(scored.scores.credibility)
            .bind(scored.scores.confidence)
            .bind(scored.flags.is_sarcasm)
            .bind(scored.flags.is_question)
            .bind(scored.flags.is_quote)
            .bind(scored.flags.is_rumor_style)
            .bind(&scored.labels.summary)
            .bind(&scored.labels.reason)
            .bind(scored.labels.credibility_label.as_str())
            .bind(&scored.labels.stance_label)
            .bind(scored.scored_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Upserted {} scored rows", rows.len());
        Ok(())
    }

    /// Scored rows for a set of raw posts
    pub async fn scored_for_posts(
        &self,
        market_id: &str,
        raw_post_ids: &[i64],
    ) -> Result<Vec<ScoredPost>> {
        if raw_post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT raw_post_id, market_id, outcome_key,
                   relevance, stance, strength, credibility, confidence,
                   is_sarcasm, is_question, is_quote, is_rumor_style,
                   summary, reason, credibility_label, stance_label, scored_at
            FROM scored_posts
            WHERE market_id = $1 AND raw_post_id = ANY($2)
            "#,
        )
        .bind(market_id)
        .bind(raw_post_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(scored_from_row).collect())
    }

    // ==================== Market state & snapshots ====================

    pub async fn get_market_state(&self, market_id: &str) -> Result<Option<MarketState>> {
        let row = sqlx::query(
            r#"
            SELECT market_id, probabilities, updated_at, accepted_post_count
            FROM market_states WHERE market_id = $1
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let probabilities = probabilities_from_json(r.get("probabilities"))?;
            Ok(MarketState {
                market_id: r.get("market_id"),
                probabilities,
                updated_at: r.get("updated_at"),
                accepted_post_count: r.get("accepted_post_count"),
            })
        })
        .transpose()
    }

    pub async fn upsert_market_state(&self, state: &MarketState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_states (market_id, probabilities, updated_at, accepted_post_count)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (market_id) DO UPDATE SET
                probabilities = EXCLUDED.probabilities,
                updated_at = EXCLUDED.updated_at,
                accepted_post_count = EXCLUDED.accepted_post_count
            "#,
        )
        .bind(&state.market_id)
        .bind(serde_json::to_value(&state.probabilities)?)
        .bind(state.updated_at)
        .bind(state.accepted_post_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_snapshot(&self, snapshot: &ProbabilitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO probability_snapshots (market_id, timestamp, probabilities)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&snapshot.market_id)
        .bind(snapshot.timestamp)
        .bind(serde_json::to_value(&snapshot.probabilities)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Filter rules ====================

    pub async fn list_rules(&self) -> Result<Vec<FilterRule>> {
        let rows = sqlx::query(
            r#"
            SELECT market_id, external_rule_id, rule_value, rule_tag, created_at
            FROM filter_rules
            ORDER BY market_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| FilterRule {
                market_id: r.get("market_id"),
                external_rule_id: r.get("external_rule_id"),
                rule_value: r.get("rule_value"),
                rule_tag: r.get("rule_tag"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn insert_rule(&self, rule: &FilterRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO filter_rules (market_id, external_rule_id, rule_value, rule_tag, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (market_id, external_rule_id) DO UPDATE SET
                rule_value = EXCLUDED.rule_value,
                rule_tag = EXCLUDED.rule_tag
            "#,
        )
        .bind(&rule.market_id)
        .bind(&rule.external_rule_id)
        .bind(&rule.rule_value)
        .bind(&rule.rule_tag)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_rules_for_market(&self, market_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM filter_rules WHERE market_id = $1")
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Row mapping ====================

fn market_from_row(row: sqlx::postgres::PgRow) -> Result<Market> {
    let status_str: String = row.get("status");
    let status = MarketStatus::try_from(status_str.as_str()).map_err(PulseError::Store)?;
    let templates: serde_json::Value = row.get("filter_templates");
    let filter_templates: Vec<String> = serde_json::from_value(templates)?;

    Ok(Market {
        id: row.get("id"),
        question: row.get("question"),
        normalized_question: row.get("normalized_question"),
        status,
        filter_templates,
        total_posts_processed: row.get("total_posts_processed"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn raw_post_from_row(row: sqlx::postgres::PgRow) -> RawPost {
    RawPost {
        id: Some(row.get("id")),
        external_post_id: row.get("external_post_id"),
        market_id: row.get("market_id"),
        text: row.get("text"),
        author_id: row.get("author_id"),
        author_followers: row.get("author_followers"),
        author_verified: row.get("author_verified"),
        author_created_at: row.get("author_created_at"),
        post_created_at: row.get("post_created_at"),
        ingested_at: row.get("ingested_at"),
        metrics: PostMetrics {
            likes: row.get("likes"),
            reposts: row.get("reposts"),
            replies: row.get("replies"),
            quotes: row.get("quotes"),
        },
        features: PostFeatures {
            cashtag_count: row.get::<i32, _>("cashtag_count") as u32,
            mention_count: row.get::<i32, _>("mention_count") as u32,
            url_count: row.get::<i32, _>("url_count") as u32,
            caps_ratio: row.get("caps_ratio"),
            is_reply: row.get("is_reply"),
            is_quote: row.get("is_quote"),
        },
        is_active: row.get("is_active"),
    }
}

fn scored_from_row(row: sqlx::postgres::PgRow) -> ScoredPost {
    use crate::domain::{CredibilityLabel, DisplayLabels, OutcomeScores, PostFlags};

    let label_str: String = row.get("credibility_label");
    let credibility_label =
        CredibilityLabel::try_from(label_str.as_str()).unwrap_or(CredibilityLabel::Medium);

    ScoredPost {
        raw_post_id: row.get("raw_post_id"),
        market_id: row.get("market_id"),
        outcome_key: row.get("outcome_key"),
        scores: OutcomeScores {
            relevance: row.get("relevance"),
            stance: row.get("stance"),
            strength: row.get("strength"),
            credibility: row.get("credibility"),
            confidence: row.get("confidence"),
        },
        flags: PostFlags {
            is_sarcasm: row.get("is_sarcasm"),
            is_question: row.get("is_question"),
            is_quote: row.get("is_quote"),
            is_rumor_style: row.get("is_rumor_style"),
        },
        labels: DisplayLabels {
            summary: row.get("summary"),
            reason: row.get("reason"),
            credibility_label,
            stance_label: row.get("stance_label"),
        },
        scored_at: row.get("scored_at"),
    }
}

fn probabilities_from_json(value: serde_json::Value) -> Result<BTreeMap<String, f64>> {
    serde_json::from_value(value).map_err(Into::into)
}
