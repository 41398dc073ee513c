//! Arena configuration.
//!
//! Values come from `ArenaConfig::default()`, optionally replaced by a TOML
//! file, then overridden by environment variables (a `.env` file is read
//! first when present).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which store backs the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database at `url` (e.g. `sqlite:./alphascroll.db?mode=rwc`)
    Sqlite { url: String },
    /// Single-process in-memory tables
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Sqlite {
            url: "sqlite:./alphascroll.db?mode=rwc".to_string(),
        }
    }
}

/// Complete arena configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Storage backend
    pub storage: StorageBackend,
    /// Use in-memory storage when the durable backend cannot be opened
    pub fallback_to_memory: bool,
    /// Full prediction window in hours
    pub prediction_window_hours: u64,
    /// Percentage move that counts as moon / dump
    pub moon_threshold_percent: f64,
    /// Seconds between evaluation sweeps
    pub evaluation_interval_secs: u64,
    /// Timeout for one price resolution, in seconds
    pub resolver_timeout_secs: u64,
    /// Maximum candidates resolved concurrently within a sweep
    pub max_parallel_evaluations: usize,
    /// Cache TTL in seconds
    pub cache_ttl_seconds: u64,
    /// Maximum cache entries
    pub max_cache_entries: usize,
    /// Largest leaderboard page served
    pub leaderboard_size: usize,
    /// CoinGecko API base URL
    pub coingecko_base_url: String,
    /// CoinGecko pro API key
    pub coingecko_api_key: Option<String>,
    /// WhatToMine API base URL
    pub whattomine_base_url: String,
    /// Fear & Greed index API base URL
    pub fear_greed_base_url: String,
    /// Etherscan API base URL
    pub etherscan_base_url: String,
    /// Etherscan API key
    pub etherscan_api_key: Option<String>,
    /// HTTP timeout in seconds
    pub http_timeout_seconds: u64,
    /// Retry attempts for upstream HTTP calls
    pub retry_attempts: usize,
    /// Upstream requests per second
    pub rate_limit_requests_per_second: u32,
    /// Default tracing filter
    pub log_level: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            fallback_to_memory: true,
            prediction_window_hours: 24,
            moon_threshold_percent: 15.0,
            evaluation_interval_secs: 3600,
            resolver_timeout_secs: 10,
            max_parallel_evaluations: 8,
            cache_ttl_seconds: 300,
            max_cache_entries: 1000,
            leaderboard_size: 100,
            coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
            coingecko_api_key: None,
            whattomine_base_url: "https://whattomine.com".to_string(),
            fear_greed_base_url: "https://api.alternative.me".to_string(),
            etherscan_base_url: "https://api.etherscan.io".to_string(),
            etherscan_api_key: None,
            http_timeout_seconds: 10,
            retry_attempts: 3,
            rate_limit_requests_per_second: 5,
            log_level: "info".to_string(),
        }
    }
}

impl ArenaConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };

        // A missing .env is normal; the process environment still applies.
        let _ = dotenvy::dotenv();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid arena configuration")
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.storage = if url == "memory" {
                StorageBackend::Memory
            } else {
                StorageBackend::Sqlite { url }
            };
        }
        if let Ok(key) = std::env::var("COINGECKO_API_KEY") {
            if !key.is_empty() {
                self.coingecko_api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("ETHERSCAN_API_KEY") {
            if !key.is_empty() {
                self.etherscan_api_key = Some(key);
            }
        }
        if let Ok(hours) = std::env::var("PREDICTION_WINDOW_HOURS") {
            self.prediction_window_hours = hours
                .parse()
                .context("PREDICTION_WINDOW_HOURS must be a whole number of hours")?;
        }
        if let Ok(secs) = std::env::var("EVALUATION_INTERVAL_SECS") {
            self.evaluation_interval_secs = secs
                .parse()
                .context("EVALUATION_INTERVAL_SECS must be a whole number of seconds")?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.prediction_window_hours > 0, "prediction_window_hours must be positive");
        anyhow::ensure!(self.evaluation_interval_secs > 0, "evaluation_interval_secs must be positive");
        anyhow::ensure!(
            self.moon_threshold_percent.is_finite() && self.moon_threshold_percent > 0.0,
            "moon_threshold_percent must be a positive number"
        );
        anyhow::ensure!(self.max_parallel_evaluations > 0, "max_parallel_evaluations must be positive");
        anyhow::ensure!(self.leaderboard_size > 0, "leaderboard_size must be positive");
        Ok(())
    }

    pub fn prediction_window(&self) -> Duration {
        Duration::from_secs(self.prediction_window_hours * 60 * 60)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}
