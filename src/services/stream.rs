//! Long-lived filtered-stream ingestion.
//!
//! Consumes the post source's streaming endpoint and feeds each delivered
//! post through the same idempotent ingest contract as pull-based ingestion.
//! Reconnects with exponential backoff, capped at a configured attempt count.

use crate::adapters::{x_api, PostgresStore, XApiClient};
use crate::config::StreamConfig;
use crate::error::{PulseError, Result};
use crate::pipeline::IngestDispatcher;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct StreamIngestor {
    store: PostgresStore,
    client: XApiClient,
    cfg: StreamConfig,
    language: Option<String>,
}

impl StreamIngestor {
    pub fn new(
        store: PostgresStore,
        client: XApiClient,
        cfg: StreamConfig,
        language: Option<String>,
    ) -> Self {
        Self {
            store,
            client,
            cfg,
            language,
        }
    }

    /// Consume the stream until the reconnect budget is exhausted.
    pub async fn run(&self) -> Result<()> {
        let mut attempts: u32 = 0;

        loop {
            match self.client.open_stream().await {
                Ok(response) => {
                    info!("stream connected");
                    attempts = 0;
                    if let Err(e) = self.consume(response).await {
                        warn!("stream dropped: {}", e);
                    }
                }
                Err(e) => {
                    warn!("stream connect failed: {}", e);
                }
            }

            attempts += 1;
            if attempts >= self.cfg.max_reconnect_attempts {
                return Err(PulseError::UpstreamPostSource(format!(
                    "stream gave up after {} reconnect attempts",
                    attempts
                )));
            }

            // Exponential backoff capped at ~5 minutes
            let delay = self
                .cfg
                .reconnect_delay_ms
                .saturating_mul(1u64 << attempts.min(6))
                .min(300_000);
            info!("stream reconnect in {}ms (attempt {})", delay, attempts);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    /// Read newline-delimited events off an open stream until it ends.
    async fn consume(&self, response: reqwest::Response) -> Result<()> {
        let ingester =
            IngestDispatcher::new(&self.store, &self.client, self.language.clone());
        let mut buffer = String::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                match x_api::parse_stream_line(&line) {
                    Ok(Some(event)) => {
                        for market_id in &event.market_tags {
                            match ingester.ingest_single(market_id, &event.post).await {
                                Ok(true) => {
                                    debug!(
                                        "stream ingested post {} for market {}",
                                        event.post.external_id, market_id
                                    );
                                }
                                Ok(false) => {}
                                Err(e) => {
                                    warn!(
                                        "stream upsert failed for market {}: {}",
                                        market_id, e
                                    );
                                }
                            }
                        }
                    }
                    Ok(None) => {} // keep-alive
                    Err(e) => warn!("stream line parse failed: {}", e),
                }
            }
        }

        Ok(())
    }
}
