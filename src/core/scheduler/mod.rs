//! Scheduler
//!
//! Time-based and on-demand enqueueing. A single task ticks once a second,
//! fires every schedule due in that wall-clock minute in one pass, then
//! sleeps. Minute-level dedup means clock jumps and hibernation never
//! double-fire a schedule within the same minute, and a trigger that lands
//! while the previous run is still active is dropped with a stale-record
//! note rather than overlapping it.

use crate::core::context::CoreContext;
use crate::core::executor::{ExecutorPool, RunHandle, SubmitError};
use crate::core::model::{Category, DataQualityIssue, IssueKind, IssueSeverity};
use chrono::{NaiveDateTime, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Priority for cron-fired runs
const SCHEDULED_PRIORITY: i32 = 50;

/// Priority for operator-triggered runs; they jump the cron queue
const TRIGGER_PRIORITY: i32 = 10;

/// Time-based trigger loop plus on-demand entry points
pub struct Scheduler {
    ctx: CoreContext,
    pool: ExecutorPool,
    shutdown_tx: broadcast::Sender<()>,
    /// Minute each scraper last fired in, for same-minute dedup
    fired: StdMutex<HashMap<String, NaiveDateTime>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(ctx: CoreContext, pool: ExecutorPool) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx,
            pool,
            shutdown_tx,
            fired: StdMutex::new(HashMap::new()),
        }
    }

    /// Get a shutdown signal receiver
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the tick loop gracefully
    pub fn shutdown(&self) {
        tracing::info!("shutting down scheduler");
        self.shutdown_tx.send(()).ok();
    }

    /// Run the tick loop until shutdown
    pub async fn start(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!("scheduler started (1s tick)");

        loop {
            let fired = self.fire_due(Utc::now().naive_utc()).await;
            if fired > 0 {
                tracing::info!(fired, "fired due schedules");
            }

            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = shutdown_rx.recv() => {
                    tracing::info!("scheduler received shutdown signal, stopping");
                    break;
                }
            }
        }
    }

    /// Fire every schedule due in the given instant's minute; one pass
    async fn fire_due(&self, now: NaiveDateTime) -> usize {
        let minute = match now.with_second(0).and_then(|m| m.with_nanosecond(0)) {
            Some(minute) => minute,
            None => return 0,
        };

        let mut fired_count = 0;
        for descriptor in self.ctx.registry.list() {
            if !descriptor.schedule.fires_in_minute(minute) {
                continue;
            }

            {
                let mut fired = self.fired.lock().expect("fired lock");
                if fired.get(&descriptor.id) == Some(&minute) {
                    continue; // already handled within this minute
                }
                fired.insert(descriptor.id.clone(), minute);
            }

            // no overlap: a due trigger meeting a live run is dropped
            if self.pool.has_active_run(&descriptor.id) {
                tracing::info!(
                    scraper = %descriptor.id,
                    "previous run still active, dropping scheduled trigger"
                );
                let issue = DataQualityIssue::new(
                    IssueKind::StaleRecord,
                    IssueSeverity::Info,
                    format!(
                        "scheduled trigger for {} dropped: previous run still active",
                        descriptor.id
                    ),
                );
                if let Err(e) = self.ctx.store.insert_issue(&issue).await {
                    tracing::warn!(error = %e, "failed to record dropped-trigger issue");
                }
                continue;
            }

            match self
                .pool
                .submit(
                    &descriptor.id,
                    SCHEDULED_PRIORITY,
                    None,
                    self.ctx.config.strategy,
                )
                .await
            {
                Ok(_) => fired_count += 1,
                Err(e) => {
                    tracing::warn!(scraper = %descriptor.id, error = %e, "scheduled submit refused");
                }
            }
        }
        fired_count
    }

    /// On-demand trigger for one scraper
    pub async fn trigger(&self, scraper_id: &str) -> Result<RunHandle, SubmitError> {
        self.pool
            .submit(scraper_id, TRIGGER_PRIORITY, None, self.ctx.config.strategy)
            .await
    }

    /// On-demand trigger for every scraper in a category
    pub async fn trigger_category(&self, category: Category) -> Vec<RunHandle> {
        let ids: Vec<String> = self
            .ctx
            .registry
            .list()
            .iter()
            .filter(|d| d.category == category)
            .map(|d| d.id.clone())
            .collect();

        let mut handles = Vec::new();
        for id in ids {
            match self
                .pool
                .submit(&id, TRIGGER_PRIORITY, None, self.ctx.config.strategy)
                .await
            {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(scraper = %id, error = %e, "category trigger refused"),
            }
        }
        handles
    }
}
