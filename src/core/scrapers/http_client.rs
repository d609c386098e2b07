//! Shared HTTP Client
//!
//! One lazily initialized reqwest client reused by every scraper driver,
//! with the project User-Agent and connection pooling.

use anyhow::Result;
use once_cell::sync::Lazy;
use std::time::Duration;

/// User-Agent declaring the project and a contact URL, sent on every
/// outbound request
pub const USER_AGENT: &str =
    "CivicPulse/0.4 (civic data aggregator; +https://civicpulse.ca/about; contact@civicpulse.ca)";

/// Per-request timeout; the run-level deadline is enforced by the runner
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

static SHARED_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .expect("failed to build shared HTTP client")
});

/// Get the shared HTTP client
///
/// Created once and reused so connection pools survive across runs.
pub fn get_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Client with a non-default timeout, for sources that need one
pub fn create_custom_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(5)
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_client_is_singleton() {
        let a = get_client();
        let b = get_client();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn user_agent_declares_contact() {
        assert!(USER_AGENT.contains("CivicPulse"));
        assert!(USER_AGENT.contains("+https://"));
    }

    #[test]
    fn custom_client_builds() {
        assert!(create_custom_client(10).is_ok());
    }
}
