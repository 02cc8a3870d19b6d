pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod services;

pub use adapters::{LlmOracle, PostSource, PostgresStore, ScoringOracle, XApiClient};
pub use config::AppConfig;
pub use engine::{EngineReport, EvidencePost, OutcomeDef};
pub use error::{PulseError, Result};
pub use pipeline::{Orchestrator, RefreshReport, RefreshStatus};
pub use services::{RefreshLoop, StreamIngestor};
