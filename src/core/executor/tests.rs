//! Executor pool tests

use super::*;
use crate::core::config::Config;
use crate::core::db::Store;
use crate::core::progress::ProgressTracker;
use crate::core::registry::ScraperRegistry;
use crate::core::scrapers::{
    RawKind, RawPayload, RawRecord, RecordSender, ScrapeError, ScrapeResult, Scraper,
};
use async_trait::async_trait;
use std::sync::atomic::AtomicU32;

/// Keeps the fixture's temp directories alive for the test duration
struct Fixture {
    pool: ExecutorPool,
    ctx: CoreContext,
    _scrapers_dir: tempfile::TempDir,
    _progress_dir: tempfile::TempDir,
}

async fn fixture(mocks: Vec<(&str, &str, Arc<dyn Scraper>)>) -> Fixture {
    let scrapers_dir = tempfile::tempdir().unwrap();
    let progress_dir = tempfile::tempdir().unwrap();

    let mut bindings: std::collections::HashMap<String, Arc<dyn Scraper>> =
        std::collections::HashMap::new();
    for (id, category, scraper) in mocks {
        let dir = scrapers_dir.path().join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("scraper.json"),
            format!(
                r#"{{
                    "id": "{id}",
                    "category": "{category}",
                    "jurisdiction": {{"code": "ca-on", "kind": "provincial", "name": "Ontario"}},
                    "timeout_seconds": 60,
                    "capabilities": {{"representatives": true}},
                    "schedule": "manual"
                }}"#
            ),
        )
        .unwrap();
        bindings.insert(id.to_string(), scraper);
    }

    let mut config = Config::default();
    config.min_workers = 2;
    config.max_workers = 4;
    let config = Arc::new(config);

    let store = Store::connect_memory().await.unwrap();
    store.migrate().await.unwrap();

    let limiter = crate::core::scrapers::rate_limiter::RateLimiter::default();
    let registry = Arc::new(
        ScraperRegistry::load(scrapers_dir.path(), &limiter, bindings).unwrap(),
    );
    for jurisdiction in registry.jurisdictions() {
        store.upsert_jurisdiction(&jurisdiction).await.unwrap();
    }

    let tracker = Arc::new(ProgressTracker::new(progress_dir.path(), store.clone()).unwrap());
    let ctx = CoreContext::new(config, store, registry, tracker, limiter);
    let pool = ExecutorPool::start(ctx.clone());

    Fixture {
        pool,
        ctx,
        _scrapers_dir: scrapers_dir,
        _progress_dir: progress_dir,
    }
}

fn person_payload(external_id: &str, name: &str) -> RawPayload {
    RawPayload::Record(
        RawRecord::new(RawKind::Person)
            .with_field("external_id", external_id)
            .with_field("name", name)
            .with_field("role", "MPP"),
    )
}

/// Emits fixed records, failing the first `fail_attempts` calls
struct FlakyScraper {
    id: String,
    records: Vec<RawPayload>,
    fail_attempts: u32,
    error: fn() -> ScrapeError,
    calls: AtomicU32,
}

impl FlakyScraper {
    fn reliable(id: &str, records: Vec<RawPayload>) -> Self {
        Self {
            id: id.to_string(),
            records,
            fail_attempts: 0,
            error: || ScrapeError::internal("unused"),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Scraper for FlakyScraper {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(
        &self,
        _budget: &RunBudget,
        cancel: &CancelToken,
        tx: RecordSender,
    ) -> ScrapeResult<()> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if call <= self.fail_attempts {
            return Err((self.error)());
        }
        for payload in self.records.clone() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if tx.send(payload).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Emits two records then waits for cancellation
struct StallAfterTwo {
    id: String,
}

#[async_trait]
impl Scraper for StallAfterTwo {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(
        &self,
        _budget: &RunBudget,
        cancel: &CancelToken,
        tx: RecordSender,
    ) -> ScrapeResult<()> {
        let _ = tx.send(person_payload("p1", "Sandra Tremblay")).await;
        let _ = tx.send(person_payload("p2", "Marc Miller")).await;
        cancel.cancelled().await;
        Ok(())
    }
}

#[tokio::test]
async fn run_to_success_persists_records_and_run_row() {
    let scraper = Arc::new(FlakyScraper::reliable(
        "ca_on",
        vec![
            person_payload("p1", "Sandra Tremblay"),
            person_payload("p2", "Marc Miller"),
            person_payload("p3", "A Singh"),
        ],
    ));
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    let handle = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap();
    let completion = handle.wait().await;

    assert_eq!(completion.status, RunStatus::Success);
    assert_eq!(completion.records_found, 3);
    assert_eq!(completion.records_new, 3);
    assert_eq!(completion.records_updated, 0);
    assert_eq!(completion.errors_count, 0);

    let run = f.ctx.store.get_run(&handle.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.ended_at.unwrap() >= run.started_at.unwrap());

    let jurisdiction = f
        .ctx
        .store
        .find_jurisdiction_by_code("ca-on")
        .await
        .unwrap()
        .unwrap();
    let reps = f.ctx.store.list_representatives(jurisdiction.id).await.unwrap();
    assert_eq!(reps.len(), 3);

    // durable snapshot reached the terminal state too
    let snapshot = f.ctx.tracker.load_run(&handle.run_id).unwrap();
    assert_eq!(snapshot.status, RunStatus::Success);
}

#[tokio::test]
async fn second_ingest_of_same_source_counts_nothing_new() {
    let records = vec![
        person_payload("p1", "Sandra Tremblay"),
        person_payload("p2", "Marc Miller"),
    ];
    let scraper = Arc::new(FlakyScraper::reliable("ca_on", records));
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    let first = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap();
    first.wait().await;

    let second = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap();
    assert_ne!(first.run_id, second.run_id);
    let completion = second.wait().await;

    assert_eq!(completion.status, RunStatus::Success);
    assert_eq!(completion.records_new, 0);
    assert_eq!(completion.records_updated, 0);
}

#[tokio::test]
async fn concurrent_submits_coalesce_to_one_handle() {
    let scraper = Arc::new(StallAfterTwo {
        id: "ca_on".to_string(),
    });
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    let a = f
        .pool
        .submit("ca_on", 10, Some("session-1"), Strategy::Balanced)
        .await
        .unwrap();
    let b = f
        .pool
        .submit("ca_on", 10, Some("session-1"), Strategy::Balanced)
        .await
        .unwrap();
    assert_eq!(a.run_id, b.run_id);

    assert!(f.pool.has_active_run("ca_on"));
    f.pool.cancel(&a);
    let completion = b.wait().await;
    assert_eq!(completion.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn cancellation_keeps_committed_records() {
    let scraper = Arc::new(StallAfterTwo {
        id: "ca_on".to_string(),
    });
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    let handle = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap();

    // give the scraper time to emit its two records
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.pool.cancel(&handle), CancelOutcome::Signalled);

    let completion = handle.wait().await;
    assert_eq!(completion.status, RunStatus::Cancelled);

    let jurisdiction = f
        .ctx
        .store
        .find_jurisdiction_by_code("ca-on")
        .await
        .unwrap()
        .unwrap();
    let reps = f.ctx.store.list_representatives(jurisdiction.id).await.unwrap();
    assert_eq!(reps.len(), 2, "records committed before cancel remain");

    assert_eq!(f.pool.cancel(&handle), CancelOutcome::AlreadyTerminal);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_and_records_recovery() {
    let scraper = Arc::new(FlakyScraper {
        id: "ca_qc".to_string(),
        records: (0..7)
            .map(|i| person_payload(&format!("p{i}"), &format!("Person Num{i}")))
            .collect(),
        fail_attempts: 1,
        error: || ScrapeError::TlsHandshake {
            host: "assnat.qc.ca".to_string(),
            message: "handshake interrupted".to_string(),
        },
        calls: AtomicU32::new(0),
    });
    let f = fixture(vec![("ca_qc", "provincial", scraper.clone())]).await;

    let handle = f
        .pool
        .submit("ca_qc", 10, None, Strategy::Balanced)
        .await
        .unwrap();
    let completion = handle.wait().await;

    assert_eq!(completion.status, RunStatus::Success);
    assert_eq!(completion.records_found, 7);
    assert_eq!(
        scraper.calls.load(std::sync::atomic::Ordering::SeqCst),
        2,
        "two attempts recorded"
    );

    let run = f.ctx.store.get_run(&handle.run_id).await.unwrap().unwrap();
    assert_eq!(run.errors_count, 1);
    assert!(run.error_log.unwrap().contains("transient_io"));

    let issues = f.ctx.store.issues_for_run(&handle.run_id).await.unwrap();
    assert!(issues
        .iter()
        .any(|i| i.kind == IssueKind::TransientIoRecovered
            && i.severity == IssueSeverity::Warning));
}

#[tokio::test]
async fn permanent_failure_fails_without_retry() {
    let scraper = Arc::new(FlakyScraper {
        id: "ca_nb".to_string(),
        records: vec![],
        fail_attempts: 99,
        error: || ScrapeError::NotFound {
            url: "https://legnb.ca/members".to_string(),
        },
        calls: AtomicU32::new(0),
    });
    let f = fixture(vec![("ca_nb", "provincial", scraper.clone())]).await;

    let handle = f
        .pool
        .submit("ca_nb", 10, None, Strategy::Balanced)
        .await
        .unwrap();
    let completion = handle.wait().await;

    assert_eq!(completion.status, RunStatus::Failed);
    assert_eq!(
        scraper.calls.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "permanent failures get no second attempt"
    );

    let issues = f.ctx.store.issues_for_run(&handle.run_id).await.unwrap();
    assert!(issues.iter().any(|i| i.severity == IssueSeverity::Error));
}

#[tokio::test]
async fn backpressure_rejects_then_recovers() {
    let scraper = Arc::new(FlakyScraper::reliable("ca_on", vec![]));
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    f.ctx.gauge.add(BACKPRESSURE_HIGH + 1);
    let err = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Backpressure { .. }));

    // still rejecting above the low watermark
    f.ctx.gauge.sub(2_000);
    assert!(f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .is_err());

    // drained below the low watermark
    f.ctx.gauge.sub(BACKPRESSURE_HIGH);
    assert!(f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .is_ok());
}

#[tokio::test]
async fn open_breaker_rejects_submissions() {
    let scraper = Arc::new(FlakyScraper::reliable("ca_on", vec![]));
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    f.ctx.breaker.trip(Duration::from_secs(30));
    let err = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::CircuitOpen { .. }));
}

#[tokio::test]
async fn unknown_scraper_is_rejected() {
    let scraper = Arc::new(FlakyScraper::reliable("ca_on", vec![]));
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    let err = f
        .pool
        .submit("ca_zz", 10, None, Strategy::Balanced)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::UnknownScraper { .. }));
}

#[tokio::test]
async fn pool_status_reflects_activity() {
    let scraper = Arc::new(StallAfterTwo {
        id: "ca_on".to_string(),
    });
    let f = fixture(vec![("ca_on", "provincial", scraper)]).await;

    let handle = f
        .pool
        .submit("ca_on", 10, None, Strategy::Balanced)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = f.pool.status();
    assert!(status.accepting);
    assert_eq!(status.running.len(), 1);
    assert_eq!(status.running[0].scraper_id, "ca_on");

    f.pool.cancel(&handle);
    handle.wait().await;

    let status = f.pool.status();
    assert!(status.running.is_empty());
}
