use clap::Parser;
use pulse::adapters::{LlmOracle, OracleConfig, PostgresStore, XApiClient, XApiConfig};
use pulse::cli::{self, Cli, Commands};
use pulse::config::AppConfig;
use pulse::error::Result;
use pulse::pipeline::Orchestrator;
use pulse::services::{RefreshLoop, StreamIngestor};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {}, using defaults", e);
            AppConfig::default_config()
        }
    };

    init_logging(&config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {}", e);
        }
        std::process::exit(1);
    }

    match &cli.command {
        Commands::Run => {
            require_or_exit(config.require_post_source());
            require_or_exit(config.require_oracle());

            let orchestrator = build_orchestrator(&config).await?;
            let interval = config.pipeline.refresh_loop_secs;
            let refresh_loop = RefreshLoop::new(orchestrator, interval);

            tokio::select! {
                _ = refresh_loop.run_forever() => {}
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received");
                }
            }
        }
        Commands::Refresh { market_id } => {
            let orchestrator = build_orchestrator(&config).await?;
            let report = orchestrator.refresh(market_id).await?;
            cli::print_report(&report)?;
        }
        Commands::RefreshAll => {
            let orchestrator = build_orchestrator(&config).await?;
            let reports = orchestrator.refresh_all().await?;
            for report in &reports {
                cli::print_report(report)?;
            }
        }
        Commands::SyncRules => {
            require_or_exit(config.require_post_source());
            let orchestrator = build_orchestrator(&config).await?;
            let report = orchestrator.sync_rules().await?;
            println!(
                "deleted={} added={} errors={:?}",
                report.deleted, report.added, report.errors
            );
        }
        Commands::Stream => {
            require_or_exit(config.require_post_source());

            let store = connect_store(&config).await?;
            let client = XApiClient::new(x_api_config(&config))?;
            let ingestor = StreamIngestor::new(
                store,
                client,
                config.stream.clone(),
                config.post_source.language.clone(),
            );

            tokio::select! {
                result = ingestor.run() => {
                    if let Err(e) = result {
                        error!("stream exited: {}", e);
                        std::process::exit(2);
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received");
                }
            }
        }
        Commands::Compute { market_id, now_ms } => {
            let orchestrator = build_orchestrator(&config).await?;
            let report = orchestrator.compute_by_id(market_id, *now_ms).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Markets => {
            let store = connect_store(&config).await?;
            cli::list_markets(&store).await?;
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await?;
        }
    }

    Ok(())
}

// Optional daily-rotating file layer. `tracing_appender::rolling::daily`
// panics if it can't create the initial log file, so preflight writability.
// Generic over the subscriber type so it can be built independently for the
// json and non-json registry stacks below (their concrete types differ).
fn build_file_layer<S>() -> Option<Box<dyn tracing_subscriber::Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    use tracing_subscriber::Layer;

    let log_dir = std::env::var("PULSE_LOG_DIR").ok()?;
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }
    let test_path = std::path::Path::new(&log_dir).join(".pulse_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&test_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_path);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(tracing_appender::rolling::daily(&log_dir, "pulse.log"))
                    .boxed(),
            )
        }
        Err(_) => None,
    }
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.logging.level)));

    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(build_file_layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(build_file_layer())
            .init();
    }
}

fn require_or_exit(check: std::result::Result<(), String>) {
    if let Err(msg) = check {
        error!("{}", msg);
        std::process::exit(1);
    }
}

fn x_api_config(config: &AppConfig) -> XApiConfig {
    XApiConfig {
        base_url: config.post_source.base_url.clone(),
        bearer_token: config.post_source.bearer_token.clone(),
        timeout_secs: config.post_source.timeout_secs,
    }
}

async fn connect_store(config: &AppConfig) -> Result<PostgresStore> {
    PostgresStore::new(&config.database.url, config.database.max_connections).await
}

async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let store = connect_store(config).await?;
    let source = XApiClient::new(x_api_config(config))?;
    let oracle = LlmOracle::new(OracleConfig {
        endpoint: config.oracle.endpoint.clone(),
        api_key: config.oracle.api_key.clone(),
        model: config.oracle.model.clone(),
        timeout_secs: config.oracle.timeout_secs,
    })?;

    Ok(Orchestrator::new(
        store,
        Box::new(source),
        Box::new(oracle),
        config.pipeline.clone(),
        config.post_source.language.clone(),
    ))
}
