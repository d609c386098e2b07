//! Scraper Contract
//!
//! The uniform extraction contract every scraper implements, the loose raw
//! record shape scrapers emit, and the shared execution plumbing (HTTP
//! client, rate limiting, the runner).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub mod drivers;
pub mod error;
pub mod http_client;
pub mod rate_limiter;
pub mod runner;

pub use error::{ErrorKind, ScrapeError, ScrapeResult, StructuredError};

/// What a raw record claims to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawKind {
    Person,
    Bill,
    Committee,
    Event,
    Vote,
    Unknown,
}

/// Loose, pre-normalization output of a scraper
///
/// Fields are untyped JSON; sources disagree on shapes (string-or-object
/// divisions, bare classification strings) and the normalizer sorts that
/// out downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub kind: RawKind,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    #[must_use]
    pub fn new(kind: RawKind) -> Self {
        Self {
            kind,
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// What a scraper may emit: a structured record or a bare string
///
/// Bare strings are coerced into `RawKind::Unknown` records by the runner;
/// they are an observation, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    Record(RawRecord),
    Text(String),
}

/// Per-run execution budget
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    /// Hard wall-clock deadline for the entire run
    pub timeout: Duration,

    /// Maximum records the run may deliver
    pub max_records: usize,
}

impl RunBudget {
    #[must_use]
    pub fn new(timeout: Duration, max_records: usize) -> Self {
        Self {
            timeout,
            max_records,
        }
    }
}

/// Cooperative cancellation signal
///
/// Cancellation is a first-class input to extraction, not ambient state.
/// Scrapers observe it at their suspension points; the runner enforces the
/// hard deadline regardless.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is signalled
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // register for wakeups before re-checking, so a cancel landing
            // between the check and the await is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Channel half a scraper emits records into
pub type RecordSender = tokio::sync::mpsc::Sender<RawPayload>;

/// Uniform extraction contract
///
/// Each scraper is a black box: given a budget and a cancellation token it
/// emits a finite sequence of raw payloads and returns. Everything else
/// (deadlines, isolation, coercion, budget enforcement) belongs to the
/// runner.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Stable scraper id, matching its registry descriptor
    fn id(&self) -> &str;

    /// Extract records, emitting each through `tx` as it is produced
    ///
    /// Implementations must not buffer the full result set, and must check
    /// `cancel` between network calls.
    async fn extract(
        &self,
        budget: &RunBudget,
        cancel: &CancelToken,
        tx: RecordSender,
    ) -> ScrapeResult<()>;
}
