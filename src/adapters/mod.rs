pub mod oracle;
pub mod postgres;
pub mod x_api;

pub use oracle::{
    LlmOracle, OracleAuthor, OracleConfig, OracleMarket, OracleMetrics, OracleOutcome, OraclePost,
    ScoreRequest, ScoreResponse, ScoreResult, ScoringOracle,
};
pub use postgres::PostgresStore;
pub use x_api::{
    PostSource, RuleSpec, SearchMeta, SearchPage, SourceAuthor, SourceMetrics, SourcePost,
    SourceRule, StreamEvent, XApiClient, XApiConfig,
};
