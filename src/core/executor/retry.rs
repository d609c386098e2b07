//! Retry & Backoff Controller
//!
//! A pure decision function over (error kind, attempt count): transient
//! failures back off exponentially with jitter, permanent failures stop
//! the session's attempts cold.

use crate::core::model::Strategy;
use crate::core::scrapers::ErrorKind;
use rand::Rng;
use std::time::Duration;

/// Base delay before the exponential factor
const BASE_DELAY_SECS: f64 = 30.0;

/// Jitter applied around the computed delay
const JITTER_FRACTION: f64 = 0.2;

/// What to do about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
    /// Priority for the re-enqueued attempt; retries lose a little urgency
    pub new_priority: i32,
}

impl RetryDecision {
    fn no_retry() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
            new_priority: 0,
        }
    }
}

/// Retry policy derived from configuration and the session strategy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base_attempts: u32, strategy: Strategy) -> Self {
        Self {
            max_attempts: strategy.retry_attempts(base_attempts),
        }
    }

    /// Decide whether attempt `attempt` (1-based) gets a successor
    #[must_use]
    pub fn decide(&self, kind: ErrorKind, attempt: u32, priority: i32) -> RetryDecision {
        if !retryable(kind) || attempt >= self.max_attempts {
            return RetryDecision::no_retry();
        }

        let base = BASE_DELAY_SECS * f64::from(2_u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let delay = Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0));

        RetryDecision {
            retry: true,
            delay,
            new_priority: priority + 1,
        }
    }
}

/// Kinds worth another attempt within the same session
fn retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TransientIo | ErrorKind::StoreUnavailable | ErrorKind::Timeout
    )
}
