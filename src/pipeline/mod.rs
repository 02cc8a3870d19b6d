pub mod ingest;
pub mod orchestrator;
pub mod rules;
pub mod scoring;

pub use ingest::{IngestDispatcher, IngestStats};
pub use orchestrator::{Orchestrator, RefreshReport, RefreshStatus};
pub use rules::{RuleSynchronizer, SyncPlan, SyncReport};
pub use scoring::ScoringDispatcher;
