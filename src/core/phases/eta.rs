//! Phase ETA estimation
//!
//! Exponentially weighted moving average of per-scraper durations within a
//! phase, scaled by the remaining scraper count over the effective
//! parallelism.

use std::time::Duration;

const ALPHA: f64 = 0.3;

/// Running duration estimate for one phase
#[derive(Debug, Clone, Default)]
pub struct EtaEstimator {
    ewma_secs: Option<f64>,
}

impl EtaEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished run's duration into the average
    pub fn observe(&mut self, duration: Duration) {
        let secs = duration.as_secs_f64();
        self.ewma_secs = Some(match self.ewma_secs {
            Some(current) => ALPHA * secs + (1.0 - ALPHA) * current,
            None => secs,
        });
    }

    /// Estimated seconds until the phase completes
    ///
    /// None until at least one duration has been observed.
    #[must_use]
    pub fn eta_seconds(&self, remaining: usize, parallelism: usize) -> Option<i64> {
        let ewma = self.ewma_secs?;
        let parallelism = parallelism.max(1) as f64;
        Some((ewma * remaining as f64 / parallelism).ceil() as i64)
    }
}
