//! Configuration management

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::reconcile::SeasonFilter;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default MySQL host.
pub const DEFAULT_MYSQL_HOST: &str = "127.0.0.1";

/// Default MySQL port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Default MySQL user.
pub const DEFAULT_MYSQL_USER: &str = "root";

/// Default database name, created on first run if missing.
pub const DEFAULT_MYSQL_DB: &str = "statsbomb";

/// Default maximum connections in the loader pool.
pub const DEFAULT_MYSQL_MAX_CONNECTIONS: u32 = 8;

// ============================================================================
// Source API Constants
// ============================================================================

/// Base URL of the open-data repository.
pub const DEFAULT_API_BASE_URL: &str =
    "https://raw.githubusercontent.com/statsbomb/open-data/master/data";

/// Default HTTP client timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Pipeline Constants
// ============================================================================

/// Competitions in scope.
pub const DEFAULT_COMPETITION_IDS: &[i64] = &[7, 1267];

/// Seasons in scope.
pub const DEFAULT_SEASON_IDS: &[i64] = &[235, 108, 107];

/// Default number of concurrent fetch/load tasks.
pub const DEFAULT_WORKERS: usize = 4;

/// Default snapshot root.
pub const DEFAULT_DATA_DIR: &str = "./raw_data";

/// ETL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub scope: ScopeConfig,
    pub workers: usize,
    pub data_dir: PathBuf,
    /// Abort on the first failure instead of logging and carrying on
    pub strict: bool,
}

/// Target database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

/// Source API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub timeout_secs: u64,
}

/// Competitions and seasons to extract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub competition_ids: Vec<i64>,
    pub season_ids: Vec<i64>,
}

impl ScopeConfig {
    pub fn season_filter(&self) -> SeasonFilter {
        SeasonFilter::new(
            self.competition_ids.iter().copied(),
            self.season_ids.iter().copied(),
        )
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_ids(key: &str, default: &[i64]) -> anyhow::Result<Vec<i64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>().with_context(|| format!("{key}: invalid id {s:?}")))
            .collect(),
        Err(_) => Ok(default.to_vec()),
    }
}

impl EtlConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = EtlConfig {
            database: DatabaseConfig {
                host: std::env::var("MYSQL_HOST").unwrap_or_else(|_| DEFAULT_MYSQL_HOST.to_string()),
                port: env_parse("MYSQL_PORT", DEFAULT_MYSQL_PORT),
                user: std::env::var("MYSQL_USER").unwrap_or_else(|_| DEFAULT_MYSQL_USER.to_string()),
                password: std::env::var("MYSQL_PASSWORD").unwrap_or_default(),
                name: std::env::var("MYSQL_DB").unwrap_or_else(|_| DEFAULT_MYSQL_DB.to_string()),
                max_connections: env_parse("MYSQL_MAX_CONNECTIONS", DEFAULT_MYSQL_MAX_CONNECTIONS),
            },
            api: ApiConfig {
                base_url: std::env::var("ETL_API_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
                username: std::env::var("SB_USERNAME").ok(),
                password: std::env::var("SB_PASSWORD").ok(),
                timeout_secs: env_parse("ETL_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            },
            scope: ScopeConfig {
                competition_ids: env_ids("ETL_COMPETITION_IDS", DEFAULT_COMPETITION_IDS)?,
                season_ids: env_ids("ETL_SEASON_IDS", DEFAULT_SEASON_IDS)?,
            },
            workers: env_parse("ETL_WORKERS", DEFAULT_WORKERS),
            data_dir: std::env::var("ETL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            strict: env_parse("ETL_STRICT", false),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("ETL_WORKERS must be greater than 0");
        }

        if self.database.name.trim().is_empty() {
            anyhow::bail!("Database name cannot be empty");
        }

        if self.database.port == 0 {
            anyhow::bail!("Database port must be greater than 0");
        }

        if self.scope.competition_ids.is_empty() {
            anyhow::bail!("At least one competition id must be configured");
        }

        if self.scope.season_ids.is_empty() {
            anyhow::bail!("At least one season id must be configured");
        }

        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("API base URL cannot be empty");
        }

        if self.api.username.is_some() != self.api.password.is_some() {
            tracing::warn!("Only one of SB_USERNAME / SB_PASSWORD is set; requests go unauthenticated");
        }

        Ok(())
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                host: DEFAULT_MYSQL_HOST.to_string(),
                port: DEFAULT_MYSQL_PORT,
                user: DEFAULT_MYSQL_USER.to_string(),
                password: String::new(),
                name: DEFAULT_MYSQL_DB.to_string(),
                max_connections: DEFAULT_MYSQL_MAX_CONNECTIONS,
            },
            api: ApiConfig {
                base_url: DEFAULT_API_BASE_URL.to_string(),
                username: None,
                password: None,
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            },
            scope: ScopeConfig {
                competition_ids: DEFAULT_COMPETITION_IDS.to_vec(),
                season_ids: DEFAULT_SEASON_IDS.to_vec(),
            },
            workers: DEFAULT_WORKERS,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            strict: false,
        }
    }
}
