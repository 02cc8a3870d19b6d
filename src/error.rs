use thiserror::Error;

/// Main error type for the pipeline and its entry points
#[derive(Error, Debug)]
pub enum PulseError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store rejected write: {0}")]
    Store(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Post source error: {0}")]
    UpstreamPostSource(String),

    #[error("Scoring oracle error: {0}")]
    UpstreamOracle(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market lifecycle errors
    #[error("Market not found: {0}")]
    MarketNotFound(String),

    #[error("Market not active: {market_id} (status: {status})")]
    MarketInactive { market_id: String, status: String },

    // Engine input errors
    #[error("Invalid engine input: {0}")]
    InvalidInput(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    /// Whether the caller should back off before the next upstream call.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PulseError::RateLimited(_))
    }
}

/// Result type alias for PulseError
pub type Result<T> = std::result::Result<T, PulseError>;
