//! Run handles
//!
//! The pool hands out cheap clone-able handles instead of run objects;
//! anyone holding one can wait for completion or signal cancellation, and
//! the pool looks runs up by id rather than retaining them.

use crate::core::model::RunStatus;
use crate::core::scrapers::CancelToken;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

/// Final summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunCompletion {
    pub run_id: String,
    pub scraper_id: String,
    pub status: RunStatus,
    pub records_found: i64,
    pub records_new: i64,
    pub records_updated: i64,
    pub errors_count: i64,
}

/// Handle to a submitted run
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub scraper_id: String,
    pub session_id: Option<String>,
    cancel: CancelToken,
    completion: watch::Receiver<Option<RunCompletion>>,
}

/// Sender half kept by the pool
pub(super) struct CompletionSender(watch::Sender<Option<RunCompletion>>);

impl CompletionSender {
    pub(super) fn complete(&self, completion: RunCompletion) {
        let _ = self.0.send(Some(completion));
    }
}

impl RunHandle {
    pub(super) fn new(
        run_id: String,
        scraper_id: String,
        session_id: Option<String>,
    ) -> (Self, CancelToken, CompletionSender) {
        let cancel = CancelToken::new();
        let (tx, rx) = watch::channel(None);
        let handle = Self {
            run_id,
            scraper_id,
            session_id,
            cancel: cancel.clone(),
            completion: rx,
        };
        (handle, cancel, CompletionSender(tx))
    }

    /// Signal cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the run has reached a terminal status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Peek at the completion without waiting
    #[must_use]
    pub fn completion(&self) -> Option<RunCompletion> {
        self.completion.borrow().clone()
    }

    /// Wait for the run to finish
    pub async fn wait(&self) -> RunCompletion {
        let mut rx = self.completion.clone();
        loop {
            if let Some(completion) = rx.borrow().clone() {
                return completion;
            }
            if rx.changed().await.is_err() {
                // pool dropped without completing; report cancellation
                return RunCompletion {
                    run_id: self.run_id.clone(),
                    scraper_id: self.scraper_id.clone(),
                    status: RunStatus::Cancelled,
                    records_found: 0,
                    records_new: 0,
                    records_updated: 0,
                    errors_count: 0,
                };
            }
        }
    }
}

/// Why a submission was refused
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("scraper {id} is not registered")]
    UnknownScraper { id: String },

    #[error("pool is not accepting submissions: normalizer backlog at {pending}")]
    Backpressure { pending: usize },

    #[error("persistence circuit breaker is open; retry in {retry_after_seconds}s")]
    CircuitOpen { retry_after_seconds: u64 },

    #[error("pool is shutting down")]
    ShuttingDown,

    #[error("store rejected the run record: {0}")]
    Store(#[from] crate::core::db::StoreError),
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Signalled,
    AlreadyTerminal,
}
