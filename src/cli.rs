use clap::{Parser, Subcommand};

use crate::adapters::PostgresStore;
use crate::error::Result;
use crate::pipeline::RefreshReport;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(version = "0.1.0")]
#[command(about = "Social-signal prediction market engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory or file path
    #[arg(short, long, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the periodic refresh loop (rule sync + refresh of all active markets)
    Run,
    /// Refresh a single market: ingest, score, recompute, snapshot
    Refresh {
        /// Market id
        market_id: String,
    },
    /// Refresh every active market once
    RefreshAll,
    /// Reconcile filter rules with the post source
    SyncRules,
    /// Consume the long-lived filtered stream into the ingest pipeline
    Stream,
    /// Recompute probabilities for a market from stored posts (no network)
    Compute {
        /// Market id
        market_id: String,
        /// Fixed engine clock in epoch milliseconds (for deterministic replay)
        #[arg(long)]
        now_ms: Option<i64>,
    },
    /// List active markets with their current probabilities
    Markets,
    /// Run database migrations
    Migrate,
}

/// Print a refresh report as pretty JSON (the entry-point result shape)
pub fn print_report(report: &RefreshReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// List active markets with current state
pub async fn list_markets(store: &PostgresStore) -> Result<()> {
    let markets = store.list_active_markets().await?;
    if markets.is_empty() {
        println!("No active markets.");
        return Ok(());
    }

    for market in &markets {
        println!("{}  {}", market.id, market.question);
        match store.get_market_state(&market.id).await? {
            Some(state) => {
                for (key, p) in &state.probabilities {
                    println!("    {:<24} {:.4}", key, p);
                }
                println!(
                    "    updated {}  accepted {}  posts {}",
                    state.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    state.accepted_post_count,
                    market.total_posts_processed
                );
            }
            None => println!("    (no state yet)"),
        }
    }
    Ok(())
}
