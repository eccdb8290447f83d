/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Newsdesk.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an override file
- Helpers to initialize and migrate an SQLite database
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/newsdesk.db")
    pub path: String,
}

/// Feed fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// CORS-relay proxy; sources are requested as `{proxy_base}?url={source}`.
    /// When unset, sources are fetched directly.
    pub proxy_base: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// Total attempts per source (1 = no retry)
    pub max_attempts: Option<u32>,
    /// Entries older than this many hours are dropped at fetch time
    pub recency_hours: Option<i64>,
    pub user_agent: Option<String>,
}

/// Cache lifetimes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub feed_ttl_minutes: Option<i64>,
    pub briefing_ttl_hours: Option<i64>,
}

/// Batch sizes for analysis and paging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Articles analyzed on a full refresh
    pub batch_size: Option<usize>,
    /// Articles analyzed per "load more"
    pub load_more_size: Option<usize>,
    pub page_size: Option<usize>,
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    // Fallback: single remote config
    pub remote: Option<RemoteLlmConfig>,
    // Task-specific configs
    pub analysis: Option<RemoteLlmConfig>,
    pub briefing: Option<RemoteLlmConfig>,
}

/// Extra content source declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    pub subcategory: Option<String>,
}

/// The user this instance serves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,
    /// JSON preferences document (categories, sources, keywords)
    pub preferences_path: Option<String>,
}

/// HTTP server settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub auto_refresh: Option<bool>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub fetch: Option<FetchConfig>,
    pub cache: Option<CacheConfig>,
    pub selection: Option<SelectionConfig>,
    pub llm: Option<LlmConfig>,
    pub user: Option<UserConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetch.as_ref().and_then(|f| f.timeout_seconds).unwrap_or(10)
    }

    pub fn fetch_max_attempts(&self) -> u32 {
        self.fetch.as_ref().and_then(|f| f.max_attempts).unwrap_or(1).max(1)
    }

    pub fn recency_hours(&self) -> i64 {
        self.fetch.as_ref().and_then(|f| f.recency_hours).unwrap_or(48)
    }

    /// At least one minute; it also drives the auto-refresh period.
    pub fn feed_ttl_minutes(&self) -> i64 {
        self.cache.as_ref().and_then(|c| c.feed_ttl_minutes).unwrap_or(30).max(1)
    }

    pub fn briefing_ttl_hours(&self) -> i64 {
        self.cache.as_ref().and_then(|c| c.briefing_ttl_hours).unwrap_or(24).max(1)
    }

    pub fn batch_size(&self) -> usize {
        self.selection.as_ref().and_then(|s| s.batch_size).unwrap_or(10)
    }

    pub fn load_more_size(&self) -> usize {
        self.selection.as_ref().and_then(|s| s.load_more_size).unwrap_or(10)
    }

    pub fn page_size(&self) -> usize {
        self.selection.as_ref().and_then(|s| s.page_size).unwrap_or(10).max(1)
    }

    pub fn auto_refresh(&self) -> bool {
        self.server.as_ref().and_then(|s| s.auto_refresh).unwrap_or(true)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Run SQL migrations using sqlx's migration macro.
/// This expects a `migrations` directory at the workspace root containing the
/// SQL migration files; they are embedded at compile time.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary, ensure the DB file exists
/// (attempting to create it if missing), and return a configured `SqlitePool`.
/// - max_connections: 5
/// - connection timeout default provided by `sqlx`
///
/// Example:
///   let pool = init_db_pool("data/newsdesk.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
