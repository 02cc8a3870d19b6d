//! Background refresh loop — periodically syncs filter rules and refreshes
//! every active market.

use crate::pipeline::{Orchestrator, RefreshStatus};
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

pub struct RefreshLoop {
    orchestrator: Orchestrator,
    interval_secs: u64,
}

impl RefreshLoop {
    pub fn new(orchestrator: Orchestrator, interval_secs: u64) -> Self {
        Self {
            orchestrator,
            interval_secs,
        }
    }

    /// Run the refresh loop forever (call from a spawned task or select
    /// against a shutdown signal).
    pub async fn run_forever(&self) {
        let interval = Duration::from_secs(self.interval_secs);
        info!("RefreshLoop: starting (interval={}s)", self.interval_secs);

        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("RefreshLoop: tick failed: {e}");
            }
        }
    }

    /// Execute a single tick: rule sync first, then the bulk refresh.
    pub async fn run_once(&self) -> crate::error::Result<()> {
        match self.orchestrator.sync_rules().await {
            Ok(report) => {
                if !report.errors.is_empty() {
                    warn!("RefreshLoop: rule sync finished with {} errors", report.errors.len());
                }
            }
            Err(e) => warn!("RefreshLoop: rule sync failed: {e}"),
        }

        let reports = self.orchestrator.refresh_all().await?;
        let ok = reports
            .iter()
            .filter(|r| r.status == RefreshStatus::Success)
            .count();
        let partial = reports
            .iter()
            .filter(|r| r.status == RefreshStatus::Partial)
            .count();
        let failed = reports.len() - ok - partial;

        info!(
            "RefreshLoop: tick complete — {} ok, {} partial, {} failed",
            ok, partial, failed
        );
        Ok(())
    }
}
