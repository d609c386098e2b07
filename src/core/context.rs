//! Core Context
//!
//! Explicit dependency bundle threaded through the orchestration layer.
//! There is no process-wide mutable state beyond the executor pool itself;
//! everything else travels through this context.

use crate::core::config::Config;
use crate::core::db::Store;
use crate::core::events::EventBus;
use crate::core::ingest::{CircuitBreaker, PendingGauge};
use crate::core::progress::ProgressTracker;
use crate::core::registry::ScraperRegistry;
use crate::core::scrapers::rate_limiter::RateLimiter;
use std::sync::Arc;

/// Shared dependencies for the orchestration components
#[derive(Clone)]
pub struct CoreContext {
    pub config: Arc<Config>,
    pub store: Store,
    pub registry: Arc<ScraperRegistry>,
    pub tracker: Arc<ProgressTracker>,
    pub events: EventBus,
    pub limiter: RateLimiter,
    pub gauge: PendingGauge,
    pub breaker: CircuitBreaker,
}

impl CoreContext {
    /// Assemble a context from already-initialized parts
    ///
    /// `limiter` should be the same instance (clones share state) handed to
    /// the registry, so every outbound request drains one bucket per host.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        store: Store,
        registry: Arc<ScraperRegistry>,
        tracker: Arc<ProgressTracker>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            tracker,
            events: EventBus::new(),
            limiter,
            gauge: PendingGauge::new(),
            breaker: CircuitBreaker::new(),
        }
    }
}
