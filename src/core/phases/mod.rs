//! Phased Loader
//!
//! Sequences the fleet through the declared loading phases: preparation,
//! federal core, the two provincial tiers, the two municipal tiers, then
//! validation. Forward-only with explicit skip; pause is a holding state
//! that lets in-flight runs finish, cancel is terminal. Every transition
//! is persisted before the next dependent action so a restarted process
//! can resume mid-session.

mod eta;

pub use eta::EtaEstimator;

use crate::core::context::CoreContext;
use crate::core::events::SystemEvent;
use crate::core::executor::{ExecutorPool, RunCompletion, RunHandle};
use crate::core::model::{
    Category, DataQualityIssue, IssueKind, IssueSeverity, LoadingSession, Phase, PhaseKind,
    PhaseStatus, SessionStatus, Strategy,
};
use crate::core::progress::{PhaseProgress, SessionSnapshot};
use crate::core::registry::{EstimatedSize, ScraperDescriptor};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Notify};

/// Provinces loaded in the first provincial tier
const PROVINCIAL_TIER1: &[&str] = &["ca-on", "ca-qc", "ca-bc", "ca-ab"];

/// Base priority per phase; later phases run at lower urgency
fn phase_priority(kind: PhaseKind) -> i32 {
    match kind {
        PhaseKind::Preparation => 0,
        PhaseKind::FederalCore => 10,
        PhaseKind::ProvincialTier1 => 20,
        PhaseKind::ProvincialTier2 => 30,
        PhaseKind::MunicipalMajor => 40,
        PhaseKind::MunicipalMinor => 50,
        PhaseKind::Validation => 60,
    }
}

/// Loader failures surfaced to the control plane
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("a loading session is already active")]
    SessionAlreadyActive,

    #[error("no active loading session")]
    NoActiveSession,

    #[error("store error: {0}")]
    Store(#[from] crate::core::db::StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlState {
    Running,
    Paused,
    Cancelled,
}

/// Live progress of one phase
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub kind: PhaseKind,
    pub status: PhaseStatus,
    pub assigned: Vec<String>,
    pub completed: usize,
    pub progress: f64,
    pub eta_seconds: Option<i64>,
}

/// Live progress of the session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub strategy: Strategy,
    pub status: SessionStatus,
    pub current_phase: Option<PhaseKind>,
    pub phases: Vec<PhaseReport>,
}

#[derive(Debug)]
struct SharedProgress {
    session_id: String,
    strategy: Strategy,
    status: SessionStatus,
    current_phase: Option<PhaseKind>,
    phases: BTreeMap<PhaseKind, PhaseEntry>,
}

#[derive(Debug, Clone)]
struct PhaseEntry {
    status: PhaseStatus,
    assigned: Vec<String>,
    pending: Vec<String>,
    completed: usize,
    eta_seconds: Option<i64>,
    started_at: Option<chrono::DateTime<Utc>>,
}

impl SharedProgress {
    fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id.clone(),
            strategy: self.strategy,
            status: self.status,
            current_phase: self.current_phase,
            phases: self
                .phases
                .iter()
                .map(|(kind, entry)| PhaseReport {
                    kind: *kind,
                    status: entry.status,
                    assigned: entry.assigned.clone(),
                    completed: entry.completed,
                    progress: if entry.assigned.is_empty() {
                        if entry.status.is_terminal() {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        entry.completed as f64 / entry.assigned.len() as f64
                    },
                    eta_seconds: entry.eta_seconds,
                })
                .collect(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            strategy: self.strategy,
            status: self.status,
            current_phase: self.current_phase,
            phases: self
                .phases
                .iter()
                .map(|(kind, entry)| {
                    (
                        *kind,
                        PhaseProgress {
                            status: entry.status,
                            assigned: entry.assigned.clone(),
                            pending: entry.pending.clone(),
                        },
                    )
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }
}

struct ActiveSession {
    session_id: String,
    control: watch::Sender<ControlState>,
    skip: Arc<Notify>,
    shared: Arc<StdMutex<SharedProgress>>,
}

/// User-controllable state machine over the loading phases
pub struct PhasedLoader {
    ctx: CoreContext,
    pool: ExecutorPool,
    active: Mutex<Option<ActiveSession>>,
}

impl PhasedLoader {
    #[must_use]
    pub fn new(ctx: CoreContext, pool: ExecutorPool) -> Self {
        Self {
            ctx,
            pool,
            active: Mutex::new(None),
        }
    }

    /// Start a new session; refuses while one is non-terminal
    pub async fn start(
        &self,
        strategy: Strategy,
        started_by: &str,
    ) -> Result<String, LoaderError> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            let status = session.shared.lock().expect("progress lock").status;
            if !status.is_terminal() {
                return Err(LoaderError::SessionAlreadyActive);
            }
        }

        let session = LoadingSession {
            id: uuid::Uuid::new_v4().to_string(),
            strategy,
            started_by: started_by.to_string(),
            status: SessionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.ctx.store.insert_session(&session).await?;

        let assignments = assign_phases(self.ctx.registry.list());
        let mut phases = BTreeMap::new();
        for kind in PhaseKind::sequence() {
            let assigned = assignments.get(&kind).cloned().unwrap_or_default();
            self.ctx
                .store
                .upsert_phase(&Phase {
                    session_id: session.id.clone(),
                    kind,
                    status: PhaseStatus::Pending,
                    started_at: None,
                    ended_at: None,
                    scraper_ids: serde_json::to_string(&assigned)
                        .unwrap_or_else(|_| "[]".to_string()),
                    progress: 0.0,
                    eta_seconds: None,
                })
                .await?;
            phases.insert(
                kind,
                PhaseEntry {
                    status: PhaseStatus::Pending,
                    pending: assigned.clone(),
                    assigned,
                    completed: 0,
                    eta_seconds: None,
                    started_at: None,
                },
            );
        }

        let shared = Arc::new(StdMutex::new(SharedProgress {
            session_id: session.id.clone(),
            strategy,
            status: SessionStatus::Running,
            current_phase: None,
            phases,
        }));

        let (control_tx, control_rx) = watch::channel(ControlState::Running);
        let skip = Arc::new(Notify::new());

        let driver = Driver {
            ctx: self.ctx.clone(),
            pool: self.pool.clone(),
            session_id: session.id.clone(),
            strategy,
            control: control_rx,
            skip: skip.clone(),
            shared: shared.clone(),
        };
        tokio::spawn(driver.drive(None));

        let session_id = session.id.clone();
        *active = Some(ActiveSession {
            session_id: session.id,
            control: control_tx,
            skip,
            shared,
        });

        tracing::info!(session = %session_id, strategy = strategy.as_str(), "loading session started");
        Ok(session_id)
    }

    /// Resume a session recovered from the progress tracker after restart
    pub async fn resume_recovered(
        &self,
        snapshot: SessionSnapshot,
    ) -> Result<String, LoaderError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(LoaderError::SessionAlreadyActive);
        }

        let mut phases = BTreeMap::new();
        for kind in PhaseKind::sequence() {
            let progress = snapshot.phases.get(&kind);
            phases.insert(
                kind,
                PhaseEntry {
                    status: progress.map_or(PhaseStatus::Pending, |p| p.status),
                    assigned: progress.map(|p| p.assigned.clone()).unwrap_or_default(),
                    pending: progress.map(|p| p.pending.clone()).unwrap_or_default(),
                    completed: progress
                        .map(|p| p.assigned.len().saturating_sub(p.pending.len()))
                        .unwrap_or(0),
                    eta_seconds: None,
                    started_at: None,
                },
            );
        }

        let shared = Arc::new(StdMutex::new(SharedProgress {
            session_id: snapshot.session_id.clone(),
            strategy: snapshot.strategy,
            status: SessionStatus::Running,
            current_phase: snapshot.current_phase,
            phases,
        }));

        let (control_tx, control_rx) = watch::channel(ControlState::Running);
        let skip = Arc::new(Notify::new());

        let driver = Driver {
            ctx: self.ctx.clone(),
            pool: self.pool.clone(),
            session_id: snapshot.session_id.clone(),
            strategy: snapshot.strategy,
            control: control_rx,
            skip: skip.clone(),
            shared: shared.clone(),
        };
        let resume_from = snapshot.current_phase;
        tokio::spawn(driver.drive(resume_from));

        let session_id = snapshot.session_id.clone();
        *active = Some(ActiveSession {
            session_id: snapshot.session_id,
            control: control_tx,
            skip,
            shared,
        });

        tracing::info!(session = %session_id, "resumed loading session after restart");
        Ok(session_id)
    }

    /// Pause: hold new submissions, let in-flight runs finish
    pub async fn pause(&self, reason: &str) -> Result<(), LoaderError> {
        let active = self.active.lock().await;
        let session = Self::require_active(&active)?;
        tracing::info!(session = %session.session_id, reason, "pausing loading session");
        let _ = session.control.send(ControlState::Paused);
        Ok(())
    }

    /// Resume from the same phase, preserving per-phase progress
    pub async fn resume(&self) -> Result<(), LoaderError> {
        let active = self.active.lock().await;
        let session = Self::require_active(&active)?;
        tracing::info!(session = %session.session_id, "resuming loading session");
        let _ = session.control.send(ControlState::Running);
        Ok(())
    }

    /// Mark the current phase skipped and advance
    pub async fn skip_phase(&self) -> Result<(), LoaderError> {
        let active = self.active.lock().await;
        let session = Self::require_active(&active)?;
        tracing::info!(session = %session.session_id, "skipping current phase");
        session.skip.notify_one();
        Ok(())
    }

    /// Cancel the session and every in-flight run it owns
    pub async fn cancel(&self) -> Result<(), LoaderError> {
        let active = self.active.lock().await;
        let session = Self::require_active(&active)?;
        tracing::info!(session = %session.session_id, "cancelling loading session");
        let _ = session.control.send(ControlState::Cancelled);
        Ok(())
    }

    /// Live report for the active or most recent session
    pub async fn status(&self) -> Option<SessionReport> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|s| s.shared.lock().expect("progress lock").report())
    }

    fn require_active(active: &Option<ActiveSession>) -> Result<&ActiveSession, LoaderError> {
        match active.as_ref() {
            Some(session)
                if !session
                    .shared
                    .lock()
                    .expect("progress lock")
                    .status
                    .is_terminal() =>
            {
                Ok(session)
            }
            _ => Err(LoaderError::NoActiveSession),
        }
    }
}

/// Owns one session's execution from start to terminal state
struct Driver {
    ctx: CoreContext,
    pool: ExecutorPool,
    session_id: String,
    strategy: Strategy,
    control: watch::Receiver<ControlState>,
    skip: Arc<Notify>,
    shared: Arc<StdMutex<SharedProgress>>,
}

impl Driver {
    async fn drive(mut self, resume_from: Option<PhaseKind>) {
        let sequence = PhaseKind::sequence();
        let start_index = resume_from
            .and_then(|kind| sequence.iter().position(|k| *k == kind))
            .unwrap_or(0);

        for kind in sequence.into_iter().skip(start_index) {
            if self.hold_while_paused(kind).await == ControlState::Cancelled {
                self.finish_session(SessionStatus::Cancelled, Some(kind)).await;
                return;
            }

            match self.run_phase(kind).await {
                PhaseOutcome::Completed | PhaseOutcome::Skipped => {}
                PhaseOutcome::Cancelled => {
                    self.finish_session(SessionStatus::Cancelled, Some(kind)).await;
                    return;
                }
            }
        }

        self.finish_session(SessionStatus::Completed, None).await;
    }

    /// Block while paused; returns the state that released the hold
    async fn hold_while_paused(&mut self, upcoming: PhaseKind) -> ControlState {
        loop {
            let state = *self.control.borrow();
            match state {
                ControlState::Running => return state,
                ControlState::Cancelled => return state,
                ControlState::Paused => {
                    tracing::info!(session = %self.session_id, phase = upcoming.as_str(), "session paused");
                    self.set_session_status(SessionStatus::Paused).await;
                    if self.control.changed().await.is_err() {
                        return ControlState::Cancelled;
                    }
                    if *self.control.borrow() == ControlState::Running {
                        self.set_session_status(SessionStatus::Running).await;
                    }
                }
            }
        }
    }

    async fn run_phase(&mut self, kind: PhaseKind) -> PhaseOutcome {
        let (pending, base_completed) = {
            let mut shared = self.shared.lock().expect("progress lock");
            shared.current_phase = Some(kind);
            let entry = shared.phases.get_mut(&kind).expect("phase entry");
            if entry.status.is_terminal() {
                return PhaseOutcome::Completed; // resumed past this phase
            }
            entry.status = PhaseStatus::Running;
            entry.started_at.get_or_insert_with(Utc::now);
            // a resumed phase keeps credit for scrapers it already finished
            (entry.pending.clone(), entry.completed)
        };
        self.persist_phase(kind, PhaseStatus::Running, false).await;
        self.ctx.events.emit(SystemEvent::PhaseChanged {
            session_id: self.session_id.clone(),
            phase: kind,
            status: PhaseStatus::Running,
        });

        // phases with no scrapers do their built-in work and move on
        if pending.is_empty() {
            if kind == PhaseKind::Validation {
                self.run_validation().await;
            }
            self.complete_phase(kind, PhaseStatus::Completed).await;
            return PhaseOutcome::Completed;
        }

        let parallelism = self.effective_parallelism(kind);
        let (done_tx, mut done_rx) = mpsc::channel::<RunCompletion>(pending.len().max(1));
        let mut handles: Vec<RunHandle> = Vec::new();

        for scraper_id in &pending {
            match self
                .pool
                .submit(
                    scraper_id,
                    phase_priority(kind),
                    Some(&self.session_id),
                    self.strategy,
                )
                .await
            {
                Ok(handle) => {
                    let done_tx = done_tx.clone();
                    let waiter = handle.clone();
                    tokio::spawn(async move {
                        let completion = waiter.wait().await;
                        let _ = done_tx.send(completion).await;
                    });
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::warn!(scraper = %scraper_id, error = %e, "phase submit refused");
                    // count it as terminal so the phase can still complete
                    let _ = done_tx
                        .send(RunCompletion {
                            run_id: String::new(),
                            scraper_id: scraper_id.clone(),
                            status: crate::core::model::RunStatus::Skipped,
                            records_found: 0,
                            records_new: 0,
                            records_updated: 0,
                            errors_count: 0,
                        })
                        .await;
                }
            }
        }
        drop(done_tx);

        let total = pending.len();
        let mut completed = 0usize;
        let mut eta = EtaEstimator::new();
        let mut phase_started = Instant::now();

        while completed < total {
            tokio::select! {
                maybe = done_rx.recv() => {
                    let Some(completion) = maybe else { break };
                    completed += 1;
                    // EWMA over wall-clock spacing of completions
                    eta.observe(phase_started.elapsed());
                    phase_started = Instant::now();

                    let remaining = total - completed;
                    {
                        let mut shared = self.shared.lock().expect("progress lock");
                        let entry = shared.phases.get_mut(&kind).expect("phase entry");
                        entry.completed = base_completed + completed;
                        entry.pending.retain(|id| id != &completion.scraper_id);
                        entry.eta_seconds = eta.eta_seconds(remaining, parallelism);
                    }
                    self.persist_phase(kind, PhaseStatus::Running, false).await;
                }
                () = self.skip.notified() => {
                    tracing::info!(session = %self.session_id, phase = kind.as_str(), "phase skipped");
                    self.complete_phase(kind, PhaseStatus::Skipped).await;
                    return PhaseOutcome::Skipped;
                }
                changed = self.control.changed() => {
                    if changed.is_err() || *self.control.borrow() == ControlState::Cancelled {
                        for handle in &handles {
                            handle.cancel();
                        }
                        // in-flight runs observe cancellation at their next
                        // suspension point; wait for them to drain
                        while completed < total {
                            match done_rx.recv().await {
                                Some(_) => completed += 1,
                                None => break,
                            }
                        }
                        self.complete_phase(kind, PhaseStatus::Cancelled).await;
                        return PhaseOutcome::Cancelled;
                    }
                    if *self.control.borrow() == ControlState::Paused {
                        // hold between completions; in-flight runs continue
                        self.set_session_status(SessionStatus::Paused).await;
                        loop {
                            if self.control.changed().await.is_err()
                                || *self.control.borrow() == ControlState::Cancelled {
                                for handle in &handles {
                                    handle.cancel();
                                }
                                self.complete_phase(kind, PhaseStatus::Cancelled).await;
                                return PhaseOutcome::Cancelled;
                            }
                            if *self.control.borrow() == ControlState::Running {
                                self.set_session_status(SessionStatus::Running).await;
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.complete_phase(kind, PhaseStatus::Completed).await;
        PhaseOutcome::Completed
    }

    /// Invariant sweep over the stored data at the end of a session
    async fn run_validation(&self) {
        let store = &self.ctx.store;

        let mut issues: Vec<DataQualityIssue> = Vec::new();

        match store
            .count_runs_in_status(crate::core::model::RunStatus::Running)
            .await
        {
            Ok(0) => {}
            Ok(count) => issues.push(DataQualityIssue::new(
                IssueKind::StaleRecord,
                IssueSeverity::Warning,
                format!("{count} runs still marked running at validation time"),
            )),
            Err(e) => tracing::warn!(error = %e, "validation query failed"),
        }

        if let Ok(jurisdictions) = store.list_jurisdictions().await {
            for jurisdiction in jurisdictions {
                match store.list_representatives(jurisdiction.id).await {
                    Ok(reps) if reps.is_empty() => {
                        issues.push(DataQualityIssue::new(
                            IssueKind::MissingRequiredField,
                            IssueSeverity::Info,
                            format!(
                                "jurisdiction {} has no active representatives after loading",
                                jurisdiction.code
                            ),
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "validation query failed"),
                }
            }
        }

        if let Err(e) = store.insert_issues(&issues).await {
            tracing::warn!(error = %e, "failed to persist validation issues");
        }
        tracing::info!(findings = issues.len(), "validation sweep finished");
    }

    fn effective_parallelism(&self, kind: PhaseKind) -> usize {
        let caps = &self.ctx.config.per_category_concurrency;
        match kind {
            PhaseKind::FederalCore => caps.cap(Category::Parliamentary),
            PhaseKind::ProvincialTier1 | PhaseKind::ProvincialTier2 => {
                caps.cap(Category::Provincial)
            }
            PhaseKind::MunicipalMajor | PhaseKind::MunicipalMinor => {
                caps.cap(Category::Municipal)
            }
            PhaseKind::Preparation | PhaseKind::Validation => 1,
        }
    }

    async fn complete_phase(&self, kind: PhaseKind, status: PhaseStatus) {
        {
            let mut shared = self.shared.lock().expect("progress lock");
            let entry = shared.phases.get_mut(&kind).expect("phase entry");
            entry.status = status;
            entry.eta_seconds = Some(0);
            if status == PhaseStatus::Completed {
                entry.completed = entry.assigned.len();
                entry.pending.clear();
            }
        }
        self.persist_phase(kind, status, true).await;
        self.ctx.events.emit(SystemEvent::PhaseChanged {
            session_id: self.session_id.clone(),
            phase: kind,
            status,
        });
    }

    async fn persist_phase(&self, kind: PhaseKind, status: PhaseStatus, ended: bool) {
        let (assigned, completed, eta_seconds, started_at, snapshot) = {
            let shared = self.shared.lock().expect("progress lock");
            let entry = &shared.phases[&kind];
            (
                entry.assigned.clone(),
                entry.completed,
                entry.eta_seconds,
                entry.started_at,
                shared.snapshot(),
            )
        };

        let progress = if assigned.is_empty() {
            1.0
        } else {
            completed as f64 / assigned.len() as f64
        };

        let phase = Phase {
            session_id: self.session_id.clone(),
            kind,
            status,
            started_at,
            ended_at: ended.then(Utc::now),
            scraper_ids: serde_json::to_string(&assigned).unwrap_or_else(|_| "[]".to_string()),
            progress,
            eta_seconds,
        };
        if let Err(e) = self.ctx.store.upsert_phase(&phase).await {
            tracing::warn!(error = %e, "failed to persist phase transition");
        }
        if let Err(e) = self.ctx.tracker.record_session(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist session snapshot");
        }
    }

    async fn set_session_status(&self, status: SessionStatus) {
        {
            let mut shared = self.shared.lock().expect("progress lock");
            shared.status = status;
        }
        if let Err(e) = self
            .ctx
            .store
            .update_session_status(&self.session_id, status)
            .await
        {
            tracing::warn!(error = %e, "failed to persist session status");
        }
        let snapshot = self.shared.lock().expect("progress lock").snapshot();
        if let Err(e) = self.ctx.tracker.record_session(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist session snapshot");
        }
    }

    async fn finish_session(&self, status: SessionStatus, at_phase: Option<PhaseKind>) {
        {
            let mut shared = self.shared.lock().expect("progress lock");
            shared.status = status;
            // phases never reached stay pending in the record
            if status == SessionStatus::Cancelled {
                if let Some(at) = at_phase {
                    for (kind, entry) in shared.phases.iter_mut() {
                        if *kind >= at && !entry.status.is_terminal() {
                            entry.status = PhaseStatus::Cancelled;
                        }
                    }
                }
            }
        }
        self.set_session_status(status).await;
        tracing::info!(session = %self.session_id, status = ?status, "loading session finished");
    }
}

enum PhaseOutcome {
    Completed,
    Skipped,
    Cancelled,
}

/// Assign every registered scraper to its loading phase
fn assign_phases(descriptors: &[ScraperDescriptor]) -> BTreeMap<PhaseKind, Vec<String>> {
    let mut assignments: BTreeMap<PhaseKind, Vec<String>> = BTreeMap::new();

    for descriptor in descriptors {
        let kind = match descriptor.category {
            Category::Parliamentary => PhaseKind::FederalCore,
            Category::Provincial => {
                if PROVINCIAL_TIER1.contains(&descriptor.jurisdiction.code.as_str()) {
                    PhaseKind::ProvincialTier1
                } else {
                    PhaseKind::ProvincialTier2
                }
            }
            Category::Municipal => {
                if descriptor.estimated_size == EstimatedSize::Large {
                    PhaseKind::MunicipalMajor
                } else {
                    PhaseKind::MunicipalMinor
                }
            }
            Category::Civic => PhaseKind::MunicipalMinor,
            // update scrapers run on their cron schedule, not in sessions
            Category::Update => continue,
        };
        assignments
            .entry(kind)
            .or_default()
            .push(descriptor.id.clone());
    }

    assignments
}
