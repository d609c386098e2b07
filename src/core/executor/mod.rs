//! Executor Pool
//!
//! Bounded parallel execution of scraper runs from a priority queue, with
//! per-category concurrency caps, submission coalescing, cooperative
//! cancellation, in-run retries, and memory-pressure-driven resizing.
//! Exactly one pool exists per process.

pub mod handle;
pub mod memory;
pub mod queue;
pub mod retry;

pub use handle::{CancelOutcome, RunCompletion, RunHandle, SubmitError};
pub use retry::{RetryDecision, RetryPolicy};

use crate::core::context::CoreContext;
use crate::core::events::SystemEvent;
use crate::core::ingest::{IngestionPipeline, BACKPRESSURE_HIGH, BACKPRESSURE_LOW};
use crate::core::model::{
    Category, DataQualityIssue, IssueKind, IssueSeverity, RunStatus, ScrapingRun, Strategy,
};
use crate::core::progress::RunSnapshot;
use crate::core::registry::ScraperDescriptor;
use crate::core::scrapers::runner::ScraperRunner;
use crate::core::scrapers::{CancelToken, ErrorKind, RawRecord, RunBudget, StructuredError};
use handle::CompletionSender;
use queue::{QueuedRun, RunQueue};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, Semaphore};

/// Breaker cool-down reported to rejected submitters
const BREAKER_RETRY_AFTER_SECS: u64 = 30;

/// Resize monitor sampling interval
const RESIZE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Sustained pressure required before downscaling
const PRESSURE_SUSTAIN: Duration = Duration::from_secs(30);

/// Sustained relief required before upscaling back
const RELIEF_SUSTAIN: Duration = Duration::from_secs(60);

const PRESSURE_HIGH_PCT: f64 = 85.0;
const PRESSURE_LOW_PCT: f64 = 70.0;

/// Per-run control state kept by the pool, looked up by run id
struct RunControl {
    cancel: CancelToken,
    completion: Option<CompletionSender>,
    coalesce_key: String,
}

struct WorkerSizing {
    nominal: usize,
    configured: usize,
    pressure_since: Option<Instant>,
    relief_since: Option<Instant>,
}

/// Point-in-time pool summary for the control plane
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub queued: usize,
    pub running: Vec<RunningRun>,
    pub workers_nominal: usize,
    pub accepting: bool,
    pub pending_records: usize,
    pub memory_pressure_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningRun {
    pub run_id: String,
    pub scraper_id: String,
}

struct PoolInner {
    ctx: CoreContext,
    queue: RunQueue,
    queue_notify: Notify,
    handles: StdMutex<HashMap<String, RunHandle>>,
    controls: StdMutex<HashMap<String, RunControl>>,
    running: StdMutex<HashSet<String>>,
    category_slots: HashMap<Category, Arc<Semaphore>>,
    workers: Arc<Semaphore>,
    sizing: StdMutex<WorkerSizing>,
    accepting: AtomicBool,
    shutdown: CancelToken,
    seq: AtomicU64,
}

/// The process-wide executor pool
#[derive(Clone)]
pub struct ExecutorPool {
    inner: Arc<PoolInner>,
}

impl ExecutorPool {
    /// Start the pool: sizes the worker set, spawns the dispatcher and the
    /// resize monitor
    #[must_use]
    pub fn start(ctx: CoreContext) -> Self {
        let worker_count =
            memory::initial_worker_count(ctx.config.min_workers, ctx.config.max_workers);

        let mut category_slots = HashMap::new();
        for category in Category::all() {
            let cap = ctx.config.per_category_concurrency.cap(category);
            category_slots.insert(category, Arc::new(Semaphore::new(cap)));
        }

        tracing::info!(workers = worker_count, "executor pool starting");

        let inner = Arc::new(PoolInner {
            queue: RunQueue::new(),
            queue_notify: Notify::new(),
            handles: StdMutex::new(HashMap::new()),
            controls: StdMutex::new(HashMap::new()),
            running: StdMutex::new(HashSet::new()),
            category_slots,
            workers: Arc::new(Semaphore::new(worker_count)),
            sizing: StdMutex::new(WorkerSizing {
                nominal: worker_count,
                configured: worker_count,
                pressure_since: None,
                relief_since: None,
            }),
            accepting: AtomicBool::new(true),
            shutdown: CancelToken::new(),
            seq: AtomicU64::new(0),
            ctx,
        });

        tokio::spawn(PoolInner::dispatch_loop(inner.clone()));
        tokio::spawn(PoolInner::resize_loop(inner.clone()));

        Self { inner }
    }

    /// Enqueue a run
    ///
    /// Idempotent per (scraper, session): a second submit while the first
    /// is non-terminal returns the existing handle.
    pub async fn submit(
        &self,
        scraper_id: &str,
        priority: i32,
        session_id: Option<&str>,
        strategy: Strategy,
    ) -> Result<RunHandle, SubmitError> {
        let inner = &self.inner;

        if inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        if inner.ctx.breaker.is_open() {
            return Err(SubmitError::CircuitOpen {
                retry_after_seconds: BREAKER_RETRY_AFTER_SECS,
            });
        }
        if !inner.update_accepting() {
            return Err(SubmitError::Backpressure {
                pending: inner.ctx.gauge.len(),
            });
        }

        let descriptor = inner
            .ctx
            .registry
            .get(scraper_id)
            .ok_or_else(|| SubmitError::UnknownScraper {
                id: scraper_id.to_string(),
            })?
            .clone();

        let coalesce_key = format!("{scraper_id}@{}", session_id.unwrap_or("-"));
        {
            let handles = inner.handles.lock().expect("handles lock");
            if let Some(existing) = handles.get(&coalesce_key) {
                if !existing.is_terminal() {
                    tracing::debug!(scraper = scraper_id, "coalesced duplicate submission");
                    return Ok(existing.clone());
                }
            }
        }

        let run = ScrapingRun::pending(
            scraper_id,
            &descriptor.jurisdiction.code,
            descriptor.category,
        );
        inner.ctx.store.insert_run(&run).await?;

        let snapshot = RunSnapshot {
            run_id: run.id.clone(),
            scraper_id: scraper_id.to_string(),
            status: RunStatus::Pending,
            attempt: 0,
            records_found: 0,
            updated_at: chrono::Utc::now(),
        };
        if let Err(e) = inner.ctx.tracker.record_run(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist pending run snapshot");
        }

        let (handle, cancel, completion) = RunHandle::new(
            run.id.clone(),
            scraper_id.to_string(),
            session_id.map(ToString::to_string),
        );

        inner
            .handles
            .lock()
            .expect("handles lock")
            .insert(coalesce_key.clone(), handle.clone());
        inner.controls.lock().expect("controls lock").insert(
            run.id.clone(),
            RunControl {
                cancel,
                completion: Some(completion),
                coalesce_key,
            },
        );

        let timeout_seconds = (descriptor.timeout_or(inner.ctx.config.default_timeout_seconds)
            as f64
            * strategy.timeout_multiplier())
        .max(1.0);

        inner.queue.push(QueuedRun {
            run_id: run.id.clone(),
            scraper_id: scraper_id.to_string(),
            priority,
            category: descriptor.category,
            seq: inner.seq.fetch_add(1, Ordering::SeqCst),
            session_id: session_id.map(ToString::to_string),
            timeout: Duration::from_secs_f64(timeout_seconds),
            max_records: descriptor.estimated_size.max_records(),
            max_attempts: strategy.retry_attempts(inner.ctx.config.max_retry_attempts),
        });
        inner.queue_notify.notify_one();

        Ok(handle)
    }

    /// Signal cancellation on a run
    pub fn cancel(&self, handle: &RunHandle) -> CancelOutcome {
        if handle.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        handle.cancel();
        CancelOutcome::Signalled
    }

    /// Whether any non-terminal run exists for the scraper
    #[must_use]
    pub fn has_active_run(&self, scraper_id: &str) -> bool {
        let handles = self.inner.handles.lock().expect("handles lock");
        handles
            .values()
            .any(|h| h.scraper_id == scraper_id && !h.is_terminal())
    }

    /// Point-in-time status summary
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let running: Vec<RunningRun> = {
            let running = self.inner.running.lock().expect("running lock");
            let handles = self.inner.handles.lock().expect("handles lock");
            running
                .iter()
                .map(|run_id| RunningRun {
                    run_id: run_id.clone(),
                    scraper_id: handles
                        .values()
                        .find(|h| &h.run_id == run_id)
                        .map(|h| h.scraper_id.clone())
                        .unwrap_or_default(),
                })
                .collect()
        };

        PoolStatus {
            queued: self.inner.queue.len(),
            running,
            workers_nominal: self.inner.sizing.lock().expect("sizing lock").nominal,
            accepting: self.inner.accepting.load(Ordering::SeqCst),
            pending_records: self.inner.ctx.gauge.len(),
            memory_pressure_pct: memory::memory_pressure_pct(),
        }
    }

    /// Stop accepting work and cancel everything in flight
    pub fn shutdown(&self) {
        tracing::info!("executor pool shutting down");
        self.inner.shutdown.cancel();
        let controls = self.inner.controls.lock().expect("controls lock");
        for control in controls.values() {
            control.cancel.cancel();
        }
        self.inner.queue_notify.notify_one();
    }
}

impl PoolInner {
    /// Backpressure hysteresis: stop accepting above the high watermark,
    /// resume below the low one
    fn update_accepting(&self) -> bool {
        let pending = self.ctx.gauge.len();
        let accepting = self.accepting.load(Ordering::SeqCst);
        if accepting && pending > BACKPRESSURE_HIGH {
            tracing::warn!(pending, "normalizer backlog over high watermark, pausing submissions");
            self.accepting.store(false, Ordering::SeqCst);
            false
        } else if !accepting && pending <= BACKPRESSURE_LOW {
            tracing::info!(pending, "normalizer backlog drained, resuming submissions");
            self.accepting.store(true, Ordering::SeqCst);
            true
        } else {
            accepting
        }
    }

    async fn dispatch_loop(inner: Arc<PoolInner>) {
        loop {
            inner.drain_queue();
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                () = inner.queue_notify.notified() => {}
            }
        }
        tracing::debug!("dispatcher stopped");
    }

    /// Dispatch every queued run that has both a worker and a category slot
    fn drain_queue(self: &Arc<Self>) {
        loop {
            let Ok(worker_permit) = self.workers.clone().try_acquire_owned() else {
                break;
            };

            let slots = &self.category_slots;
            let Some(item) = self
                .queue
                .pop_dispatchable(|category| slots[&category].available_permits() > 0)
            else {
                drop(worker_permit);
                break;
            };

            let Ok(category_permit) = self.category_slots[&item.category]
                .clone()
                .try_acquire_owned()
            else {
                // lost the slot between the check and the acquire; requeue
                self.queue.push(item);
                drop(worker_permit);
                continue;
            };

            let pool = self.clone();
            tokio::spawn(async move {
                pool.run_one(item).await;
                drop(category_permit);
                drop(worker_permit);
                pool.queue_notify.notify_one();
            });
        }
    }

    /// Execute one queued run to its terminal status, retries included
    #[tracing::instrument(skip_all, fields(run = %item.run_id, scraper = %item.scraper_id))]
    async fn run_one(self: &Arc<Self>, item: QueuedRun) {
        let ctx = &self.ctx;

        let (cancel, completion, coalesce_key) = {
            let mut controls = self.controls.lock().expect("controls lock");
            let Some(control) = controls.get_mut(&item.run_id) else {
                tracing::error!("run has no control entry, dropping");
                return;
            };
            (
                control.cancel.clone(),
                control.completion.take(),
                control.coalesce_key.clone(),
            )
        };
        let Some(completion) = completion else {
            tracing::error!("run already executed, dropping duplicate dispatch");
            return;
        };

        let Some(descriptor) = ctx.registry.get(&item.scraper_id).cloned() else {
            tracing::error!("descriptor vanished after submit");
            return;
        };
        let Some(scraper) = ctx.registry.scraper(&item.scraper_id) else {
            tracing::error!("scraper implementation vanished after submit");
            return;
        };

        // cancellation may arrive while the run is still queued
        if cancel.is_cancelled() {
            self.finish(
                &item,
                &descriptor,
                RunStatus::Cancelled,
                IngestTally::default(),
                Vec::new(),
                Vec::new(),
                completion,
                &coalesce_key,
            )
            .await;
            return;
        }

        if let Err(e) = ctx.store.mark_run_running(&item.run_id).await {
            tracing::error!(error = %e, "could not mark run running");
            self.finish(
                &item,
                &descriptor,
                RunStatus::Failed,
                IngestTally::default(),
                vec![StructuredError::of_kind(
                    ErrorKind::StoreUnavailable,
                    e.to_string(),
                )],
                Vec::new(),
                completion,
                &coalesce_key,
            )
            .await;
            return;
        }
        self.running
            .lock()
            .expect("running lock")
            .insert(item.run_id.clone());
        self.record_snapshot(&item, RunStatus::Running, 1, 0).await;
        ctx.events.emit(SystemEvent::RunStarted {
            run_id: item.run_id.clone(),
            scraper_id: item.scraper_id.clone(),
        });

        let jurisdiction = match ctx
            .store
            .find_jurisdiction_by_code(&descriptor.jurisdiction.code)
            .await
        {
            Ok(Some(j)) => j,
            _ => {
                // registry seeding should have created it; create on demand
                let entity = descriptor.jurisdiction.to_entity();
                match ctx.store.upsert_jurisdiction(&entity).await {
                    Ok(id) => {
                        let mut entity = entity;
                        entity.id = id;
                        entity
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "cannot resolve jurisdiction");
                        self.finish(
                            &item,
                            &descriptor,
                            RunStatus::Failed,
                            IngestTally::default(),
                            vec![StructuredError::of_kind(
                                ErrorKind::StoreUnavailable,
                                e.to_string(),
                            )],
                            Vec::new(),
                            completion,
                            &coalesce_key,
                        )
                        .await;
                        return;
                    }
                }
            }
        };

        let policy = RetryPolicy {
            max_attempts: item.max_attempts,
        };
        let budget = RunBudget::new(item.timeout, item.max_records);

        let mut errors: Vec<StructuredError> = Vec::new();
        let mut issues: Vec<DataQualityIssue> = Vec::new();
        let mut tally = IngestTally::default();
        let mut final_status = RunStatus::Failed;
        let mut attempt = 1;

        loop {
            let (tx, rx) = mpsc::channel::<RawRecord>(256);
            let pipeline = IngestionPipeline::new(
                ctx.store.clone(),
                ctx.gauge.clone(),
                ctx.breaker.clone(),
            );
            let consumer = tokio::spawn({
                let run_id = item.run_id.clone();
                let jurisdiction = jurisdiction.clone();
                async move { pipeline.consume(&run_id, &jurisdiction, rx).await }
            });

            let outcome =
                ScraperRunner::run(scraper.clone(), budget, cancel.clone(), tx).await;
            let stats = match consumer.await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(error = %e, "ingestion consumer panicked");
                    Default::default()
                }
            };

            errors.extend(outcome.errors);
            issues.extend(outcome.issues);
            issues.extend(stats.issues);

            tally = IngestTally {
                records_found: stats.records_found,
                records_new: stats.records_new,
                records_updated: stats.records_updated,
                observed_representatives: stats.observed_representatives,
            };

            if stats.persistence_failed {
                final_status = RunStatus::Failed;
                break;
            }

            match outcome.status {
                RunStatus::Success => {
                    if attempt > 1 {
                        issues.push(
                            DataQualityIssue::new(
                                IssueKind::TransientIoRecovered,
                                IssueSeverity::Warning,
                                format!(
                                    "{} succeeded on attempt {attempt} after transient failures",
                                    item.scraper_id
                                ),
                            )
                            .for_run(item.run_id.clone()),
                        );
                    }
                    final_status = RunStatus::Success;
                    break;
                }
                RunStatus::Cancelled => {
                    final_status = RunStatus::Cancelled;
                    break;
                }
                status @ (RunStatus::Failed | RunStatus::Timeout) => {
                    let kind = if status == RunStatus::Timeout {
                        ErrorKind::Timeout
                    } else {
                        errors.last().map_or(ErrorKind::PermanentIo, |e| e.kind)
                    };
                    if status == RunStatus::Timeout {
                        errors.push(StructuredError::of_kind(
                            ErrorKind::Timeout,
                            format!("attempt {attempt} exceeded its {:?} deadline", item.timeout),
                        ));
                    }

                    let decision = policy.decide(kind, attempt, item.priority);
                    if decision.retry && !cancel.is_cancelled() {
                        attempt += 1;
                        tracing::info!(
                            attempt,
                            delay = ?decision.delay,
                            "retrying after {}",
                            kind.as_str()
                        );
                        self.record_snapshot(&item, RunStatus::Running, attempt, tally.records_found)
                            .await;
                        tokio::select! {
                            () = tokio::time::sleep(decision.delay) => continue,
                            () = cancel.cancelled() => {
                                final_status = RunStatus::Cancelled;
                                break;
                            }
                        }
                    }

                    // permanent failures flag the scraper for maintenance
                    if !kind.is_transient() && kind != ErrorKind::Timeout {
                        issues.push(
                            DataQualityIssue::new(
                                IssueKind::ScraperFailure,
                                IssueSeverity::Error,
                                format!(
                                    "{} failed permanently: {}",
                                    item.scraper_id,
                                    errors
                                        .last()
                                        .map_or_else(|| "unknown error".to_string(), |e| e
                                            .message
                                            .clone())
                                ),
                            )
                            .for_run(item.run_id.clone()),
                        );
                    }
                    final_status = status;
                    break;
                }
                other => {
                    tracing::error!(?other, "runner returned a non-terminal status");
                    final_status = RunStatus::Failed;
                    break;
                }
            }
        }

        self.finish(
            &item,
            &descriptor,
            final_status,
            tally,
            errors,
            issues,
            completion,
            &coalesce_key,
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        self: &Arc<Self>,
        item: &QueuedRun,
        descriptor: &ScraperDescriptor,
        status: RunStatus,
        tally: IngestTally,
        errors: Vec<StructuredError>,
        mut issues: Vec<DataQualityIssue>,
        completion: CompletionSender,
        coalesce_key: &str,
    ) {
        let ctx = &self.ctx;

        let summary = format!(
            "{}: {} found, {} new, {} updated, {} errors",
            status.as_str(),
            tally.records_found,
            tally.records_new,
            tally.records_updated,
            errors.len()
        );

        if let Err(e) = ctx
            .store
            .finish_run(
                &item.run_id,
                status,
                tally.records_found,
                tally.records_new,
                tally.records_updated,
                &errors,
                Some(&summary),
            )
            .await
        {
            tracing::error!(error = %e, "failed to persist run completion");
        }

        for issue in &mut issues {
            if issue.run_id.is_none() {
                issue.run_id = Some(item.run_id.clone());
            }
        }
        if let Err(e) = ctx.store.insert_issues(&issues).await {
            tracing::error!(error = %e, "failed to persist run issues");
        }

        // successful representative scrapes advance the soft-delete sweep
        if status == RunStatus::Success && descriptor.capabilities.representatives {
            if let Ok(Some(jurisdiction)) = ctx
                .store
                .find_jurisdiction_by_code(&descriptor.jurisdiction.code)
                .await
            {
                match ctx
                    .store
                    .mark_unobserved_representatives(
                        jurisdiction.id,
                        &tally.observed_representatives,
                        ctx.config.inactive_after_missed_runs,
                    )
                    .await
                {
                    Ok(0) => {}
                    Ok(deactivated) => {
                        tracing::info!(deactivated, "soft-deleted unobserved representatives");
                    }
                    Err(e) => tracing::warn!(error = %e, "unobserved sweep failed"),
                }
            }
        }

        self.record_snapshot(item, status, 0, tally.records_found).await;

        self.running
            .lock()
            .expect("running lock")
            .remove(&item.run_id);

        ctx.events.emit(SystemEvent::RunFinished {
            run_id: item.run_id.clone(),
            scraper_id: item.scraper_id.clone(),
            status,
            records_new: tally.records_new,
            records_updated: tally.records_updated,
        });

        completion.complete(RunCompletion {
            run_id: item.run_id.clone(),
            scraper_id: item.scraper_id.clone(),
            status,
            records_found: tally.records_found,
            records_new: tally.records_new,
            records_updated: tally.records_updated,
            errors_count: errors.len() as i64,
        });

        // release the coalescing slot only after completion is observable
        let mut handles = self.handles.lock().expect("handles lock");
        if handles
            .get(coalesce_key)
            .is_some_and(|h| h.run_id == item.run_id)
        {
            handles.remove(coalesce_key);
        }
        drop(handles);
        self.controls
            .lock()
            .expect("controls lock")
            .remove(&item.run_id);

        tracing::info!(status = status.as_str(), "{summary}");
    }

    async fn record_snapshot(
        &self,
        item: &QueuedRun,
        status: RunStatus,
        attempt: u32,
        records_found: i64,
    ) {
        let snapshot = RunSnapshot {
            run_id: item.run_id.clone(),
            scraper_id: item.scraper_id.clone(),
            status,
            attempt,
            records_found,
            updated_at: chrono::Utc::now(),
        };
        if let Err(e) = self.ctx.tracker.record_run(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist run snapshot");
        }
    }

    /// Memory-pressure monitor: halve the worker set under sustained
    /// pressure, restore it after sustained relief
    async fn resize_loop(inner: Arc<PoolInner>) {
        loop {
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                () = tokio::time::sleep(RESIZE_SAMPLE_INTERVAL) => {}
            }

            let Some(pressure) = memory::memory_pressure_pct() else {
                continue;
            };

            let now = Instant::now();
            let mut sizing = inner.sizing.lock().expect("sizing lock");

            if pressure > PRESSURE_HIGH_PCT {
                sizing.relief_since = None;
                let since = *sizing.pressure_since.get_or_insert(now);
                if now.duration_since(since) >= PRESSURE_SUSTAIN
                    && sizing.nominal == sizing.configured
                {
                    let target = (sizing.configured / 2).max(inner.ctx.config.min_workers.min(sizing.configured));
                    let to_remove = sizing.nominal - target;
                    sizing.nominal = target;
                    drop(sizing);

                    tracing::warn!(pressure, target, "sustained memory pressure, downscaling workers");
                    let workers = inner.workers.clone();
                    tokio::spawn(async move {
                        if let Ok(permits) = workers.acquire_many_owned(to_remove as u32).await {
                            permits.forget();
                        }
                    });
                    continue;
                }
            } else if pressure < PRESSURE_LOW_PCT {
                sizing.pressure_since = None;
                let since = *sizing.relief_since.get_or_insert(now);
                if now.duration_since(since) >= RELIEF_SUSTAIN && sizing.nominal < sizing.configured
                {
                    let to_add = sizing.configured - sizing.nominal;
                    sizing.nominal = sizing.configured;
                    drop(sizing);

                    tracing::info!("memory pressure relieved, restoring worker count");
                    inner.workers.add_permits(to_add);
                    inner.queue_notify.notify_one();
                    continue;
                }
            } else {
                sizing.pressure_since = None;
                sizing.relief_since = None;
            }
        }
    }
}

/// Counters carried from the pipeline into run completion
#[derive(Debug, Default)]
struct IngestTally {
    records_found: i64,
    records_new: i64,
    records_updated: i64,
    observed_representatives: Vec<String>,
}

#[cfg(test)]
mod tests;
