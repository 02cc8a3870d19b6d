use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub post_source: PostSourceConfig,
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shared credential guarding the orchestrator entry points; enforcement
    /// belongs to whatever transport embeds them
    #[serde(default)]
    pub internal_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostSourceConfig {
    /// REST base URL of the post source
    #[serde(default = "default_post_source_url")]
    pub base_url: String,
    /// Bearer token; required for live ingest
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_post_source_timeout")]
    pub timeout_secs: u64,
    /// Optional language filter appended to search queries
    #[serde(default = "default_language")]
    pub language: Option<String>,
}

fn default_post_source_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_post_source_timeout() -> u64 {
    15
}

fn default_language() -> Option<String> {
    Some("en".to_string())
}

impl Default for PostSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_post_source_url(),
            bearer_token: String::new(),
            timeout_secs: default_post_source_timeout(),
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    /// Chat-completions endpoint base
    #[serde(default = "default_oracle_endpoint")]
    pub endpoint: String,
    /// API key; required for scoring
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

fn default_oracle_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_oracle_timeout() -> u64 {
    45
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            endpoint: default_oracle_endpoint(),
            api_key: String::new(),
            model: default_oracle_model(),
            timeout_secs: default_oracle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Skip a refresh when the last productive one was this recent
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: u64,
    /// Pause between markets in a bulk tick
    #[serde(default = "default_inter_market_delay_ms")]
    pub inter_market_delay_ms: u64,
    /// Extra pause after the post source returns 429
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,
    /// Max posts requested from the source per market per tick
    #[serde(default = "default_ingest_batch")]
    pub ingest_batch: u32,
    /// Max posts sent to the oracle per market per tick
    #[serde(default = "default_score_batch")]
    pub score_batch: i64,
    /// Period of the `run` loop
    #[serde(default = "default_refresh_loop_secs")]
    pub refresh_loop_secs: u64,
}

fn default_min_refresh_interval_ms() -> u64 {
    30_000
}

fn default_inter_market_delay_ms() -> u64 {
    2_000
}

fn default_rate_limit_cooldown_ms() -> u64 {
    30_000
}

fn default_ingest_batch() -> u32 {
    15
}

fn default_score_batch() -> i64 {
    8
}

fn default_refresh_loop_secs() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
            inter_market_delay_ms: default_inter_market_delay_ms(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
            ingest_batch: default_ingest_batch(),
            score_batch: default_score_batch(),
            refresh_loop_secs: default_refresh_loop_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from either a config directory or a single TOML file
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("internal_secret", "")?;

        // Accept either a config directory (`config/`) or a single TOML file.
        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::from(config_path.join("default.toml")).required(false))
                .add_source(
                    File::from(config_path.join(
                        std::env::var("PULSE_ENV").unwrap_or_else(|_| "development".to_string()),
                    ))
                    .required(false),
                );
        }

        builder = builder.add_source(
            // Override with environment variables (PULSE_DATABASE__URL, etc.)
            Environment::with_prefix("PULSE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: Self = builder.build()?.try_deserialize()?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Default configuration for ad-hoc CLI usage when no config file exists
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/pulse".to_string(),
                max_connections: 5,
            },
            post_source: PostSourceConfig::default(),
            oracle: OracleSettings::default(),
            pipeline: PipelineConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
            internal_secret: String::new(),
        }
    }

    /// Validate configuration values. Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }
        if self.pipeline.ingest_batch == 0 || self.pipeline.ingest_batch > 25 {
            errors.push(format!(
                "pipeline.ingest_batch must be in 1..=25, got {}",
                self.pipeline.ingest_batch
            ));
        }
        if self.pipeline.score_batch <= 0 || self.pipeline.score_batch > 16 {
            errors.push(format!(
                "pipeline.score_batch must be in 1..=16, got {}",
                self.pipeline.score_batch
            ));
        }
        if self.stream.max_reconnect_attempts == 0 {
            errors.push("stream.max_reconnect_attempts must be > 0".to_string());
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            errors.push(format!(
                "logging.level must be one of {:?}, got \"{}\"",
                valid_levels, self.logging.level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Live ingest needs a post-source token
    pub fn require_post_source(&self) -> Result<(), String> {
        if self.post_source.bearer_token.is_empty() {
            Err("post_source.bearer_token is required for live ingest".to_string())
        } else {
            Ok(())
        }
    }

    /// Scoring needs an oracle key
    pub fn require_oracle(&self) -> Result<(), String> {
        if self.oracle.api_key.is_empty() {
            Err("oracle.api_key is required for scoring".to_string())
        } else {
            Ok(())
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string(&[
            "PULSE_DATABASE__URL",
            "PULSE_DATABASE_URL",
            "DATABASE_URL",
        ]) {
            self.database.url = v;
        }
        if let Some(v) = env_string(&["PULSE_POST_SOURCE__BEARER_TOKEN", "POST_SOURCE_TOKEN"]) {
            self.post_source.bearer_token = v;
        }
        if let Some(v) = env_string(&["PULSE_ORACLE__API_KEY", "ORACLE_API_KEY"]) {
            self.oracle.api_key = v;
        }
        if let Some(v) = env_string(&["PULSE_ORACLE__MODEL", "ORACLE_MODEL_NAME"]) {
            self.oracle.model = v;
        }
        if let Some(v) = env_string(&["PULSE_INTERNAL_SECRET", "INTERNAL_SECRET"]) {
            self.internal_secret = v;
        }
        if let Some(v) = env_string(&["PULSE_LOGGING__LEVEL", "LOG_LEVEL"]) {
            self.logging.level = v;
        }
    }
}

fn env_string(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(v) = std::env::var(key) {
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    None
}
