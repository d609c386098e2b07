//! Configuration I/O operations

use super::types::Config;
use super::validation::validate_config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from file, apply environment overrides, validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        config.apply_env_overrides();
        validate_config(&config)?;

        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => anyhow::bail!("config file {} does not exist", p.display()),
            None => {
                let mut config = Config::default();
                config.apply_env_overrides();
                validate_config(&config)?;
                Ok(config)
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        validate_config(self)?;

        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Default configuration file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("civicpulse.json")
    }
}
