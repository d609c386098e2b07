//! Scraper Runner
//!
//! Executes one scraper end-to-end: spawns it in an isolated task, enforces
//! the hard wall-clock deadline and the record budget, coerces loose
//! output, and captures every failure without letting it reach the pool.

use super::{
    CancelToken, RawKind, RawPayload, RawRecord, RunBudget, Scraper, ScrapeError, StructuredError,
};
use crate::core::model::{DataQualityIssue, IssueKind, IssueSeverity, RunStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Grace period between cancellation and forced termination
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Capacity of the scraper-side record channel; keeps the runner from
/// buffering a whole result set
const EMIT_CHANNEL_CAPACITY: usize = 64;

/// Everything a finished run reports back to the executor
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub errors: Vec<StructuredError>,
    pub issues: Vec<DataQualityIssue>,
    pub records_emitted: u64,
    pub duration: Duration,
    /// Process RSS observed at completion, when readable
    pub resource_peak_kb: Option<u64>,
}

/// Single-run executor
pub struct ScraperRunner;

impl ScraperRunner {
    /// Run one scraper to completion, forwarding coerced records downstream
    ///
    /// Already-emitted records are always delivered, including on timeout
    /// and cancellation. The returned outcome never carries a scraper
    /// failure as a Rust error; failures are captured as structured errors.
    #[tracing::instrument(skip_all, fields(scraper = scraper.id()))]
    pub async fn run(
        scraper: Arc<dyn Scraper>,
        budget: RunBudget,
        cancel: CancelToken,
        downstream: mpsc::Sender<RawRecord>,
    ) -> RunOutcome {
        let started = Instant::now();
        let deadline = started + budget.timeout;
        let scraper_id = scraper.id().to_string();

        let (emit_tx, mut emit_rx) = mpsc::channel::<RawPayload>(EMIT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        let task_budget = budget;
        let mut task = tokio::spawn(async move {
            scraper.extract(&task_budget, &task_cancel, emit_tx).await
        });

        let mut errors: Vec<StructuredError> = Vec::new();
        let mut issues: Vec<DataQualityIssue> = Vec::new();
        let mut emitted: u64 = 0;
        let mut deadline_hit = false;
        let mut cancelled = false;

        loop {
            tokio::select! {
                // drain emitted records ahead of noticing the deadline, so a
                // record committed at the final instant is still delivered
                biased;

                payload = emit_rx.recv() => {
                    let Some(payload) = payload else {
                        break; // scraper finished and dropped its sender
                    };

                    let record = match payload {
                        RawPayload::Record(record) => record,
                        RawPayload::Text(text) => {
                            issues.push(
                                DataQualityIssue::new(
                                    IssueKind::UnknownClassification,
                                    IssueSeverity::Warning,
                                    format!(
                                        "scraper {scraper_id} emitted a bare string; coerced to an unknown record"
                                    ),
                                )
                            );
                            let mut coerced = RawRecord::new(RawKind::Unknown);
                            coerced
                                .fields
                                .insert("text".to_string(), serde_json::Value::String(text));
                            coerced
                        }
                    };

                    if downstream.send(record).await.is_err() {
                        // consumer went away; nothing left to deliver to
                        tracing::warn!(scraper = %scraper_id, "record consumer dropped, stopping run");
                        cancel.cancel();
                        cancelled = true;
                        break;
                    }
                    emitted += 1;

                    if emitted as usize >= budget.max_records {
                        issues.push(DataQualityIssue::new(
                            IssueKind::BudgetExhausted,
                            IssueSeverity::Warning,
                            format!(
                                "scraper {scraper_id} hit its record budget of {}",
                                budget.max_records
                            ),
                        ));
                        cancel.cancel();
                        break;
                    }
                }

                () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    tracing::warn!(scraper = %scraper_id, "run deadline exceeded");
                    deadline_hit = true;
                    cancel.cancel();
                    break;
                }

                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
            }
        }

        // Closing the channel unblocks a scraper stuck mid-send.
        drop(emit_rx);

        // Let the scraper observe cancellation and wind down; force-abort if
        // it does not yield within the grace period.
        let join = tokio::time::timeout(CANCEL_GRACE, &mut task).await;
        let scrape_result = match join {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(scraper = %scraper_id, "scraper did not yield within grace period, aborting");
                task.abort();
                Ok(Err(ScrapeError::internal(
                    "scraper did not yield within the cancellation grace period",
                )))
            }
        };

        match scrape_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                // suppress the synthetic error a cancel/deadline provokes in
                // well-behaved scrapers, keep real failures
                if !deadline_hit && !cancelled {
                    errors.push(StructuredError::capture(&err));
                } else {
                    tracing::debug!(scraper = %scraper_id, error = %err, "error after termination signal");
                }
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("scraper {scraper_id} panicked")
                } else {
                    format!("scraper {scraper_id} task aborted")
                };
                tracing::error!(scraper = %scraper_id, "{message}");
                if !deadline_hit && !cancelled {
                    errors.push(StructuredError::capture(&ScrapeError::internal(message)));
                }
            }
        }

        let status = if deadline_hit {
            RunStatus::Timeout
        } else if cancelled && (emitted as usize) < budget.max_records {
            RunStatus::Cancelled
        } else if errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        RunOutcome {
            status,
            errors,
            issues,
            records_emitted: emitted,
            duration: started.elapsed(),
            resource_peak_kb: crate::core::executor::memory::current_rss_kb(),
        }
    }
}
