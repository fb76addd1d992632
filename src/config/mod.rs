//! Configuration management for the funding matrix collector.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange enablement and discovery settings
    #[serde(default)]
    pub exchanges: ExchangesConfig,
    /// Collection cadence and backfill bounds
    #[serde(default)]
    pub collection: CollectionConfig,
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Open interest ranking job
    #[serde(default)]
    pub open_interest: OpenInterestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangesConfig {
    #[serde(default = "default_true")]
    pub binance: bool,
    #[serde(default = "default_true")]
    pub bybit: bool,
    #[serde(default = "default_true")]
    pub okx: bool,
    #[serde(default = "default_true")]
    pub bitget: bool,
    #[serde(default = "default_true")]
    pub hyperliquid: bool,
    #[serde(default = "default_true")]
    pub lighter: bool,
    /// Include runtime-discovered HIP3 deployer sub-exchanges
    #[serde(default = "default_true")]
    pub hip3: bool,
    /// HIP3 deployers the update cycle is allowed to process. Bulk
    /// discovery ignores this list and takes every deployer it finds.
    #[serde(default = "default_hip3_deployers")]
    pub hip3_allowed_deployers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Fixed symbol list for bootstrap runs; when unset the universe is
    /// discovered from the enabled exchanges
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    /// Default lookback for bootstrap runs, in days
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    /// Hard cap on any single backfill window, in days
    #[serde(default = "default_max_backfill_days")]
    pub max_backfill_days: u32,
    /// History pulled for a newly listed asset, in days
    #[serde(default = "default_new_asset_days")]
    pub new_asset_history_days: u32,
    /// Skip an update when the newest stored record is fresher than this
    #[serde(default = "default_gap_threshold_minutes")]
    pub gap_threshold_minutes: i64,
    /// Consecutive failures before an exchange is benched
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Where the failure tracker persists between cycles
    #[serde(default = "default_failure_tracker_path")]
    pub failure_tracker_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterestConfig {
    /// How many top markets to keep
    #[serde(default = "default_oi_top_n")]
    pub top_n: usize,
    /// Concurrent per-symbol fetches
    #[serde(default = "default_oi_workers")]
    pub workers: usize,
}

fn default_true() -> bool {
    true
}

fn default_hip3_deployers() -> Vec<String> {
    ["xyz", "cash", "flx", "hyna"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_days_back() -> u32 {
    365
}

fn default_max_backfill_days() -> u32 {
    365
}

fn default_new_asset_days() -> u32 {
    30
}

fn default_gap_threshold_minutes() -> i64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_failure_tracker_path() -> String {
    "data/failure_tracker.json".to_string()
}

fn default_database_path() -> String {
    "data/funding.db".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_oi_top_n() -> usize {
    10
}

fn default_oi_workers() -> usize {
    10
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FM"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.collection.max_backfill_days >= 1,
            "max_backfill_days must be at least 1"
        );
        anyhow::ensure!(
            self.collection.new_asset_history_days <= self.collection.max_backfill_days,
            "new_asset_history_days cannot exceed max_backfill_days"
        );
        anyhow::ensure!(
            self.collection.failure_threshold >= 1,
            "failure_threshold must be at least 1"
        );
        anyhow::ensure!(self.open_interest.workers >= 1, "workers must be at least 1");

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: ExchangesConfig::default(),
            collection: CollectionConfig::default(),
            storage: StorageConfig::default(),
            open_interest: OpenInterestConfig::default(),
        }
    }
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        Self {
            binance: true,
            bybit: true,
            okx: true,
            bitget: true,
            hyperliquid: true,
            lighter: true,
            hip3: true,
            hip3_allowed_deployers: default_hip3_deployers(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            symbols: None,
            days_back: default_days_back(),
            max_backfill_days: default_max_backfill_days(),
            new_asset_history_days: default_new_asset_days(),
            gap_threshold_minutes: default_gap_threshold_minutes(),
            failure_threshold: default_failure_threshold(),
            failure_tracker_path: default_failure_tracker_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for OpenInterestConfig {
    fn default() -> Self {
        Self {
            top_n: default_oi_top_n(),
            workers: default_oi_workers(),
        }
    }
}
