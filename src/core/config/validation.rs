//! Configuration validation
//!
//! Rejects out-of-range values at startup rather than letting them surface
//! as stalls or runaway concurrency mid-session.

use super::types::Config;
use anyhow::{bail, Result};

/// Validate a configuration, returning the first violation found
pub fn validate_config(config: &Config) -> Result<()> {
    if config.store_url.is_empty() {
        bail!("store_url must not be empty");
    }

    if config.min_workers == 0 {
        bail!("min_workers must be at least 1");
    }

    if config.max_workers < config.min_workers {
        bail!(
            "max_workers ({}) must be >= min_workers ({})",
            config.max_workers,
            config.min_workers
        );
    }

    if config.default_timeout_seconds == 0 {
        bail!("default_timeout_seconds must be at least 1");
    }

    if config.max_retry_attempts == 0 {
        bail!("max_retry_attempts must be at least 1");
    }

    if !(config.rate_limit_per_host_rps > 0.0) {
        bail!(
            "rate_limit_per_host_rps must be positive, got {}",
            config.rate_limit_per_host_rps
        );
    }

    if config.rate_limit_burst == 0 {
        bail!("rate_limit_burst must be at least 1");
    }

    if config.stream_buffer_seconds == 0 {
        bail!("stream_buffer_seconds must be at least 1");
    }

    if config.inactive_after_missed_runs < 1 {
        bail!(
            "inactive_after_missed_runs must be at least 1, got {}",
            config.inactive_after_missed_runs
        );
    }

    let caps = &config.per_category_concurrency;
    for (name, cap) in [
        ("parliamentary", caps.parliamentary),
        ("provincial", caps.provincial),
        ("municipal", caps.municipal),
        ("civic", caps.civic),
        ("update", caps.update),
    ] {
        if cap == 0 {
            bail!("per_category_concurrency.{name} must be at least 1");
        }
    }

    if config.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        bail!("bind_addr {:?} is not a valid socket address", config.bind_addr);
    }

    Ok(())
}
