//! Configuration type definitions

use crate::core::model::{Category, Strategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-category concurrency caps for the executor pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConcurrency {
    #[serde(default = "super::defaults::default_parliamentary_concurrency")]
    pub parliamentary: usize,

    #[serde(default = "super::defaults::default_provincial_concurrency")]
    pub provincial: usize,

    #[serde(default = "super::defaults::default_municipal_concurrency")]
    pub municipal: usize,

    #[serde(default = "super::defaults::default_civic_concurrency")]
    pub civic: usize,

    #[serde(default = "super::defaults::default_update_concurrency")]
    pub update: usize,
}

impl Default for CategoryConcurrency {
    fn default() -> Self {
        Self {
            parliamentary: Category::Parliamentary.default_concurrency(),
            provincial: Category::Provincial.default_concurrency(),
            municipal: Category::Municipal.default_concurrency(),
            civic: Category::Civic.default_concurrency(),
            update: Category::Update.default_concurrency(),
        }
    }
}

impl CategoryConcurrency {
    #[must_use]
    pub fn cap(&self, category: Category) -> usize {
        match category {
            Category::Parliamentary => self.parliamentary,
            Category::Provincial => self.provincial,
            Category::Municipal => self.municipal,
            Category::Civic => self.civic,
            Category::Update => self.update,
        }
    }
}

/// Process-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection string for the relational store
    #[serde(default = "super::defaults::default_store_url")]
    pub store_url: String,

    /// Directory holding one subdirectory per scraper
    #[serde(default = "super::defaults::default_scrapers_dir")]
    pub scrapers_dir: PathBuf,

    /// Filesystem directory for durable progress snapshots
    #[serde(default = "super::defaults::default_progress_path")]
    pub progress_path: PathBuf,

    /// Lower bound for the executor worker count
    #[serde(default = "super::defaults::default_min_workers")]
    pub min_workers: usize,

    /// Upper bound for the executor worker count
    #[serde(default = "super::defaults::default_max_workers")]
    pub max_workers: usize,

    /// Per-run hard deadline before the strategy multiplier
    #[serde(default = "super::defaults::default_timeout_seconds")]
    pub default_timeout_seconds: u64,

    /// Retry budget for transient failures
    #[serde(default = "super::defaults::default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Executor concurrency caps per scraper category
    #[serde(default)]
    pub per_category_concurrency: CategoryConcurrency,

    /// Outbound token-bucket refill rate per external host
    #[serde(default = "super::defaults::default_rate_limit_per_host_rps")]
    pub rate_limit_per_host_rps: f64,

    /// Outbound token-bucket burst per external host
    #[serde(default = "super::defaults::default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    /// Default loading strategy for phased sessions
    #[serde(default)]
    pub strategy: Strategy,

    /// Status-stream replay window in seconds
    #[serde(default = "super::defaults::default_stream_buffer_seconds")]
    pub stream_buffer_seconds: u64,

    /// Consecutive unobserved runs before a representative is marked inactive
    #[serde(default = "super::defaults::default_inactive_after_missed_runs")]
    pub inactive_after_missed_runs: i64,

    /// Control plane bind address
    #[serde(default = "super::defaults::default_bind_addr")]
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        // serde defaults double as the programmatic defaults
        serde_json::from_str("{}").expect("default config must deserialize")
    }
}

impl Config {
    /// Apply recognized environment overrides (CIVICPULSE_STORE_URL,
    /// CIVICPULSE_BIND_ADDR, CIVICPULSE_SCRAPERS_DIR, CIVICPULSE_PROGRESS_PATH)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CIVICPULSE_STORE_URL") {
            self.store_url = url;
        }
        if let Ok(addr) = std::env::var("CIVICPULSE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(dir) = std::env::var("CIVICPULSE_SCRAPERS_DIR") {
            self.scrapers_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CIVICPULSE_PROGRESS_PATH") {
            self.progress_path = PathBuf::from(dir);
        }
    }
}
