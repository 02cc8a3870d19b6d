//! Ingestion dispatcher: pull candidate posts for a market, deduplicate,
//! enrich with spam features, and persist.

use crate::adapters::{PostSource, PostgresStore, SourcePost};
use crate::domain::{Market, PostFeatures, PostMetrics, RawPost};
use crate::engine::features;
use crate::error::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Counters for one ingest pass
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub fetched: u32,
    pub ingested: u32,
}

/// Build the post-source query from a market's filter templates.
///
/// Templates are OR-joined; retweets are always excluded and an optional
/// language filter is appended.
pub fn build_query(templates: &[String], language: Option<&str>) -> String {
    let joined = templates
        .iter()
        .map(|t| format!("({})", t))
        .collect::<Vec<_>>()
        .join(" OR ");
    let mut query = format!("{} -is:retweet", joined);
    if let Some(lang) = language {
        query.push_str(&format!(" lang:{}", lang));
    }
    query
}

/// Turn a source post into a raw-post row, computing features from the text.
pub fn compose_raw_post(market_id: &str, post: &SourcePost, ingested_at: DateTime<Utc>) -> RawPost {
    let extracted = features::extract(&post.text);
    RawPost {
        id: None,
        external_post_id: post.external_id.clone(),
        market_id: market_id.to_string(),
        text: post.text.clone(),
        author_id: post.author_id.clone(),
        author_followers: post.author.followers_count,
        author_verified: post.author.verified,
        author_created_at: post.author.created_at,
        post_created_at: post.created_at,
        ingested_at,
        metrics: PostMetrics {
            likes: post.metrics.map(|m| m.likes),
            reposts: post.metrics.map(|m| m.reposts),
            replies: post.metrics.map(|m| m.replies),
            quotes: post.metrics.map(|m| m.quotes),
        },
        features: PostFeatures {
            is_reply: None,
            is_quote: None,
            ..extracted
        },
        is_active: true,
    }
}

/// Pulls candidate posts from the source and upserts them for one market
pub struct IngestDispatcher<'a> {
    store: &'a PostgresStore,
    source: &'a dyn PostSource,
    language: Option<String>,
}

impl<'a> IngestDispatcher<'a> {
    pub fn new(store: &'a PostgresStore, source: &'a dyn PostSource, language: Option<String>) -> Self {
        Self {
            store,
            source,
            language,
        }
    }

    /// One ingest pass: a single post-source call, then idempotent upserts.
    /// Rate-limit errors bubble up distinctly so the orchestrator can back off.
    pub async fn ingest_for_market(&self, market: &Market, max_posts: u32) -> Result<IngestStats> {
        if market.filter_templates.is_empty() {
            debug!("market {} has no filter templates, skipping ingest", market.id);
            return Ok(IngestStats::default());
        }

        let query = build_query(&market.filter_templates, self.language.as_deref());
        let since_id = self.store.latest_external_post_id(&market.id).await?;

        let page = self
            .source
            .search_recent(&query, max_posts, since_id.as_deref())
            .await?;

        let now = Utc::now();
        let mut stats = IngestStats {
            fetched: page.posts.len() as u32,
            ingested: 0,
        };

        for post in &page.posts {
            let row = compose_raw_post(&market.id, post, now);
            if self.store.upsert_raw_post(&row).await? {
                stats.ingested += 1;
            }
        }

        info!(
            "ingest market={}: fetched={} ingested={}",
            market.id, stats.fetched, stats.ingested
        );
        Ok(stats)
    }

    /// Upsert a single post delivered out-of-band (the streaming variant).
    /// Returns true when the row is new.
    pub async fn ingest_single(&self, market_id: &str, post: &SourcePost) -> Result<bool> {
        let row = compose_raw_post(market_id, post, Utc::now());
        self.store.upsert_raw_post(&row).await
    }
}
