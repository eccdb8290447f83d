/*
newsdesk - single-binary main.rs
This binary starts the Rocket HTTP server and the auto-refresh task inside the same process.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;

use newsdesk::cache::SqliteStore;
use newsdesk::ingestion::FeedFetcher;
use newsdesk::llm::analyst::LlmAnalyst;
use newsdesk::llm::remote::RemoteLlmProvider;
use newsdesk::llm::LlmProvider;
use newsdesk::preferences::Preferences;
use newsdesk::server::launch_rocket;
use newsdesk::session::{FeedSession, SessionSettings};
use newsdesk::sources::SourceCatalog;

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Newsdesk personal news analyst: HTTP server + auto-refresh")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the preferences JSON document (overrides user.preferences_path)
    #[arg(long, value_name = "FILE")]
    preferences: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single refresh, log a summary and exit
    #[arg(long)]
    once: bool,

    /// Do not refresh the feed in the background
    #[arg(long)]
    no_auto_refresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config.clone() {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    // Initialize DB pool and schema
    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    common::run_migrations(&db_pool).await?;
    info!(db_path = %config.database.path, "database ready");

    let prefs = load_preferences(&args, &config).await?;
    if let Err(reason) = prefs.validate() {
        anyhow::bail!("Invalid preferences: {}", reason);
    }

    let catalog = SourceCatalog::with_configured(&config.sources);
    let sources = catalog.resolve(&prefs.sources);
    if sources.is_empty() {
        warn!("No content sources selected; the feed will be empty");
    }
    info!(sources = sources.len(), categories = prefs.categories.len(), "preferences loaded");

    let llm_config = config
        .llm
        .as_ref()
        .context("Missing [llm] section in configuration")?;
    let analysis_llm: Arc<dyn LlmProvider> = Arc::from(create_llm_provider(llm_config, LlmTask::Analysis)?);
    let briefing_llm: Arc<dyn LlmProvider> = Arc::from(create_llm_provider(llm_config, LlmTask::Briefing)?);
    let analyst = Arc::new(LlmAnalyst::new(analysis_llm).with_briefing_provider(briefing_llm));

    let settings = SessionSettings::from_config(&config);
    let refresh_period = settings
        .feed_ttl
        .to_std()
        .unwrap_or_else(|_| Duration::from_secs(30 * 60));

    let session = FeedSession::new(
        prefs,
        sources,
        FeedFetcher::from_config(&config)?,
        analyst.clone(),
        analyst,
        Arc::new(SqliteStore::new(db_pool.clone())),
        settings,
    );

    if args.once {
        let outcome = session.refresh().await?;
        let counts = session.counts().await;
        info!(?outcome, analyzed = counts.analyzed, fetched = counts.fetched, "single refresh finished");
        return Ok(());
    }

    match session.open().await {
        Ok(loaded) => info!(?loaded, "feed session opened"),
        Err(e) => error!(%e, "initial feed load failed; serving an empty feed"),
    }

    let auto_refresh = if !args.no_auto_refresh && config.auto_refresh() {
        info!(period = ?refresh_period, "Starting auto-refresh task");
        Some(session.start_auto_refresh(refresh_period))
    } else {
        info!("Auto-refresh disabled");
        None
    };

    // Launch the Rocket server (blocking until Rocket shuts down)
    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(session.clone(), &config).await {
        error!(%e, "Rocket server failed");
    }

    info!("HTTP server stopped; stopping auto-refresh");
    if let Some(task) = auto_refresh {
        if tokio::time::timeout(Duration::from_secs(20), task.stop()).await.is_err() {
            info!("Timed out waiting for auto-refresh to exit; continuing shutdown");
        }
    }

    db_pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn load_preferences(args: &Args, config: &Config) -> Result<Preferences> {
    let path = args.preferences.clone().or_else(|| {
        config
            .user
            .as_ref()
            .and_then(|u| u.preferences_path.as_ref())
            .map(PathBuf::from)
    });

    match path {
        Some(path) => Preferences::from_file(&path).await,
        None => {
            warn!("No preferences file configured; using empty preferences");
            Ok(Preferences::default())
        }
    }
}

/// Which task a provider is created for
#[derive(Debug, Clone, Copy)]
enum LlmTask {
    Analysis,
    Briefing,
}

/// Create an LLM provider based on configuration and task
fn create_llm_provider(llm_config: &common::LlmConfig, task: LlmTask) -> anyhow::Result<Box<dyn LlmProvider>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("remote");
    match adapter {
        "remote" => {
            // Task-specific config, falling back to [llm.remote]
            let endpoint_config = match task {
                LlmTask::Analysis => llm_config.analysis.as_ref().or(llm_config.remote.as_ref()),
                LlmTask::Briefing => llm_config.briefing.as_ref().or(llm_config.remote.as_ref()),
            };

            let remote_config = endpoint_config
                .ok_or_else(|| anyhow::anyhow!("Remote adapter selected but no LLM config found for {:?}", task))?;

            // Fetch API key from env var; local OpenAI-compatible servers may need none
            let api_key = match remote_config.api_key_env.as_deref() {
                Some(env) => std::env::var(env)
                    .with_context(|| format!("LLM API key env var '{}' not set", env))?,
                None => String::new(),
            };
            let model = remote_config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string());
            let timeout_secs = remote_config.timeout_seconds.unwrap_or(30);
            let max_tokens = remote_config.max_tokens.unwrap_or(1200);
            let temperature = match task {
                LlmTask::Analysis => 0.2,
                LlmTask::Briefing => 0.5,
            };

            info!(?task, %model, %api_url, "LLM provider initialized");
            let provider = RemoteLlmProvider::new(api_url, api_key, model)
                .with_defaults(timeout_secs, max_tokens, temperature);
            Ok(Box::new(provider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}
