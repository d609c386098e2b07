//! Ingestion Pipeline
//!
//! Consumes a run's record stream, normalizes each record, deduplicates
//! within the run, and commits canonical entities in bounded transactions.
//! Store hiccups are retried with backoff; a batch that cannot be
//! persisted fails the run and opens a circuit breaker so the pool stops
//! taking new submissions while the store recovers.

pub mod fingerprint;

use crate::core::db::{Store, StoreError, UpsertOutcome};
use crate::core::model::{
    Committee, DataQualityIssue, Event, IssueKind, IssueSeverity, Jurisdiction, Membership,
    Sponsorship, Vote,
};
use crate::core::normalize::{CanonicalEntity, Normalizer};
use crate::core::scrapers::RawRecord;
use fingerprint::representative_fingerprint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Entities per transaction
const BATCH_SIZE: usize = 100;

/// Total backoff budget for an unavailable store
const STORE_RETRY_BUDGET: Duration = Duration::from_secs(60);

/// How long the breaker blocks new submissions after a persistence failure
const BREAKER_OPEN_FOR: Duration = Duration::from_secs(30);

/// Backpressure thresholds on pending normalizer records
pub const BACKPRESSURE_HIGH: usize = 10_000;
pub const BACKPRESSURE_LOW: usize = 5_000;

/// Gauge of records sitting between the runners and the store
#[derive(Debug, Clone, Default)]
pub struct PendingGauge {
    pending: Arc<AtomicUsize>,
}

impl PendingGauge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::SeqCst);
    }

    pub fn sub(&self, n: usize) {
        let mut current = self.pending.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(n);
            match self.pending.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cooldown preventing new submissions after a persistence failure
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    open_until: Arc<Mutex<Option<Instant>>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self, open_for: Duration) {
        let mut open_until = self.open_until.lock().expect("breaker lock");
        *open_until = Some(Instant::now() + open_for);
        tracing::warn!(?open_for, "persistence circuit breaker opened");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        let mut open_until = self.open_until.lock().expect("breaker lock");
        match *open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *open_until = None;
                false
            }
            None => false,
        }
    }
}

/// Per-run ingestion result
#[derive(Debug, Default)]
pub struct IngestStats {
    pub records_found: i64,
    pub records_new: i64,
    pub records_updated: i64,
    pub issues: Vec<DataQualityIssue>,
    /// External ids of representatives this run observed
    pub observed_representatives: Vec<String>,
    /// Set when a batch could not be persisted
    pub persistence_failed: bool,
}

/// Natural keys already resolved during this run
#[derive(Default)]
struct RunCache {
    representatives: HashMap<String, i64>,
    bills: HashMap<(String, String), i64>,
    committees: HashMap<String, i64>,
    events: HashMap<String, i64>,
    fingerprints: HashMap<String, String>,
}

/// Normalization plus transactional persistence for one run at a time
pub struct IngestionPipeline {
    store: Store,
    gauge: PendingGauge,
    breaker: CircuitBreaker,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(store: Store, gauge: PendingGauge, breaker: CircuitBreaker) -> Self {
        Self {
            store,
            gauge,
            breaker,
        }
    }

    /// Consume a run's record stream to completion
    #[tracing::instrument(skip_all, fields(run = run_id, jurisdiction = %jurisdiction.code))]
    pub async fn consume(
        &self,
        run_id: &str,
        jurisdiction: &Jurisdiction,
        mut rx: mpsc::Receiver<RawRecord>,
    ) -> IngestStats {
        let normalizer = Normalizer::new(&jurisdiction.code, jurisdiction.kind);
        let mut stats = IngestStats::default();
        let mut cache = RunCache::default();
        let mut batch: Vec<CanonicalEntity> = Vec::new();
        let mut batch_records = 0usize;

        while let Some(record) = rx.recv().await {
            stats.records_found += 1;
            batch_records += 1;
            self.gauge.add(1);

            let mut output = normalizer.normalize(&record);
            for issue in &mut output.issues {
                issue.run_id = Some(run_id.to_string());
            }
            stats.issues.append(&mut output.issues);

            for entity in output.entities {
                batch.push(self.dedup(entity, jurisdiction, run_id, &mut cache, &mut stats));
            }

            if batch.len() >= BATCH_SIZE {
                let drained: Vec<_> = batch.drain(..).collect();
                let committed = self
                    .commit_with_recovery(run_id, jurisdiction, drained, &mut cache, &mut stats)
                    .await;
                self.gauge.sub(batch_records);
                batch_records = 0;
                if !committed {
                    stats.persistence_failed = true;
                    return stats;
                }
            }
        }

        if !batch.is_empty() || batch_records > 0 {
            let drained: Vec<_> = batch.drain(..).collect();
            let committed = self
                .commit_with_recovery(run_id, jurisdiction, drained, &mut cache, &mut stats)
                .await;
            self.gauge.sub(batch_records);
            if !committed {
                stats.persistence_failed = true;
            }
        }

        stats
    }

    /// Within-run fingerprint dedup for representatives
    fn dedup(
        &self,
        entity: CanonicalEntity,
        jurisdiction: &Jurisdiction,
        run_id: &str,
        cache: &mut RunCache,
        stats: &mut IngestStats,
    ) -> CanonicalEntity {
        let mut rep = match entity {
            CanonicalEntity::Representative(rep) => rep,
            other => return other,
        };

        let fingerprint = representative_fingerprint(
            &rep.full_name(),
            rep.district.as_deref(),
            &jurisdiction.code,
        );

        match cache.fingerprints.get(&fingerprint) {
            Some(first_external_id) if *first_external_id != rep.external_id => {
                stats.issues.push(
                    DataQualityIssue::new(
                        IssueKind::DuplicateCollision,
                        IssueSeverity::Warning,
                        format!(
                            "representative {} collides with {} on fingerprint; merged",
                            rep.external_id, first_external_id
                        ),
                    )
                    .for_run(run_id)
                    .for_entity(format!(
                        "representative:{}/{first_external_id}",
                        jurisdiction.code
                    )),
                );
                // merge by re-addressing the second candidate at the first
                rep.external_id = first_external_id.clone();
            }
            _ => {
                cache
                    .fingerprints
                    .insert(fingerprint, rep.external_id.clone());
            }
        }

        CanonicalEntity::Representative(rep)
    }

    /// Commit a batch, riding out transient store failures
    ///
    /// Order of recovery: backoff while the store reports unavailable (up
    /// to the budget), then one re-run at half batch size, then give up
    /// and open the breaker.
    async fn commit_with_recovery(
        &self,
        run_id: &str,
        jurisdiction: &Jurisdiction,
        batch: Vec<CanonicalEntity>,
        cache: &mut RunCache,
        stats: &mut IngestStats,
    ) -> bool {
        let deadline = Instant::now() + STORE_RETRY_BUDGET;
        let mut delay = Duration::from_secs(1);

        loop {
            match self
                .commit_batch(run_id, jurisdiction, &batch, cache, stats)
                .await
            {
                Ok(()) => return true,
                Err(err) if err.is_retryable() && Instant::now() + delay < deadline => {
                    tracing::warn!(run = run_id, error = %err, ?delay, "store unavailable, backing off");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(16));
                }
                Err(err) => {
                    tracing::warn!(run = run_id, error = %err, "batch failed, re-running at half size");
                    break;
                }
            }
        }

        // one re-run with the batch halved
        let half = batch.len().div_ceil(2).max(1);
        let mut all_ok = true;
        for chunk in batch.chunks(half) {
            if let Err(err) = self
                .commit_batch(run_id, jurisdiction, chunk, cache, stats)
                .await
            {
                tracing::error!(run = run_id, error = %err, "half-batch re-run failed");
                all_ok = false;
                break;
            }
        }
        if all_ok {
            return true;
        }

        stats.issues.push(
            DataQualityIssue::new(
                IssueKind::PersistenceFailure,
                IssueSeverity::Critical,
                format!("batch of {} entities could not be persisted", batch.len()),
            )
            .for_run(run_id),
        );
        self.breaker.trip(BREAKER_OPEN_FOR);
        false
    }

    /// Apply one batch inside a single transaction
    async fn commit_batch(
        &self,
        run_id: &str,
        jurisdiction: &Jurisdiction,
        batch: &[CanonicalEntity],
        cache: &mut RunCache,
        stats: &mut IngestStats,
    ) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;

        for entity in batch {
            // a lost unique-constraint race gets one retry before it counts
            let mut attempt = 0;
            loop {
                match self
                    .apply_entity(&mut tx, run_id, jurisdiction, entity, cache, stats)
                    .await
                {
                    Ok(()) => break,
                    Err(StoreError::ConstraintViolation { entity: what, detail })
                        if attempt == 0 =>
                    {
                        tracing::debug!(%what, %detail, "constraint race, retrying entity once");
                        attempt += 1;
                    }
                    Err(StoreError::ConstraintViolation { entity: what, detail }) => {
                        stats.issues.push(
                            DataQualityIssue::new(
                                IssueKind::DuplicateCollision,
                                IssueSeverity::Error,
                                format!("constraint violation on {what} persisted twice: {detail}"),
                            )
                            .for_run(run_id),
                        );
                        break;
                    }
                    Err(StoreError::StatusRegression { bill, from, to }) => {
                        stats.issues.push(
                            DataQualityIssue::new(
                                IssueKind::StaleRecord,
                                IssueSeverity::Error,
                                format!("bill {bill} reported {to} after reaching {from}; stored row unchanged"),
                            )
                            .for_run(run_id)
                            .for_entity(format!("bill:{}/{bill}", jurisdiction.code)),
                        );
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::unavailable("commit batch", Some(e)))?;
        Ok(())
    }

    async fn apply_entity(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        run_id: &str,
        jurisdiction: &Jurisdiction,
        entity: &CanonicalEntity,
        cache: &mut RunCache,
        stats: &mut IngestStats,
    ) -> Result<(), StoreError> {
        match entity {
            CanonicalEntity::Representative(rep) => {
                let mut rep = rep.clone();
                rep.jurisdiction_id = jurisdiction.id;
                let outcome = self.store.upsert_representative(&mut *tx, &rep).await?;
                self.count(outcome, stats);
                cache
                    .representatives
                    .insert(rep.external_id.clone(), outcome.row_id());
                stats.observed_representatives.push(rep.external_id);
            }
            CanonicalEntity::Bill(bill) => {
                let mut bill = bill.clone();
                bill.jurisdiction_id = jurisdiction.id;
                let outcome = self.store.upsert_bill(&mut *tx, &bill).await?;
                self.count(outcome, stats);
                cache.bills.insert(
                    (bill.bill_number.clone(), bill.session.clone()),
                    outcome.row_id(),
                );
            }
            CanonicalEntity::Committee(committee) => {
                let mut committee = committee.clone();
                committee.jurisdiction_id = jurisdiction.id;
                let outcome = self.store.upsert_committee(&mut *tx, &committee).await?;
                self.count(outcome, stats);
                cache.committees.insert(committee.name.clone(), outcome.row_id());
            }
            CanonicalEntity::Event(draft) => {
                let bill_id = match (&draft.bill_number, &draft.bill_session) {
                    (Some(number), Some(session)) => {
                        cache.bills.get(&(number.clone(), session.clone())).copied()
                    }
                    _ => None,
                };
                let committee_id = draft
                    .committee_name
                    .as_ref()
                    .and_then(|name| cache.committees.get(name).copied());

                let event = Event {
                    id: 0,
                    jurisdiction_id: jurisdiction.id,
                    external_id: draft.external_id.clone(),
                    category: draft.category,
                    title: draft.title.clone(),
                    event_date: draft.event_date,
                    bill_id,
                    committee_id,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                };
                let outcome = self.store.upsert_event(&mut *tx, &event).await?;
                self.count(outcome, stats);
                cache.events.insert(draft.external_id.clone(), outcome.row_id());
            }
            CanonicalEntity::Vote(draft) => {
                let (Some(event_id), Some(rep_id)) = (
                    cache.events.get(&draft.event_external_id).copied(),
                    cache
                        .representatives
                        .get(&draft.representative_external_id)
                        .copied(),
                ) else {
                    stats.issues.push(
                        DataQualityIssue::new(
                            IssueKind::MissingRequiredField,
                            IssueSeverity::Warning,
                            format!(
                                "vote references unknown event {} or representative {}",
                                draft.event_external_id, draft.representative_external_id
                            ),
                        )
                        .for_run(run_id),
                    );
                    return Ok(());
                };
                let outcome = self
                    .store
                    .upsert_vote(
                        &mut *tx,
                        &Vote {
                            id: 0,
                            event_id,
                            representative_id: rep_id,
                            result: draft.result,
                        },
                    )
                    .await?;
                self.count(outcome, stats);
            }
            CanonicalEntity::Sponsorship(draft) => {
                let bill_id = cache
                    .bills
                    .get(&(draft.bill_number.clone(), draft.session.clone()))
                    .copied();
                let rep_id = cache
                    .representatives
                    .get(&draft.representative_external_id)
                    .copied();
                let (Some(bill_id), Some(rep_id)) = (bill_id, rep_id) else {
                    stats.issues.push(
                        DataQualityIssue::new(
                            IssueKind::MissingRequiredField,
                            IssueSeverity::Warning,
                            format!(
                                "sponsorship references unknown bill {}/{} or representative {}",
                                draft.bill_number, draft.session, draft.representative_external_id
                            ),
                        )
                        .for_run(run_id),
                    );
                    return Ok(());
                };
                let outcome = self
                    .store
                    .upsert_sponsorship(
                        &mut *tx,
                        &Sponsorship {
                            id: 0,
                            bill_id,
                            representative_id: rep_id,
                            is_primary: draft.is_primary,
                        },
                    )
                    .await?;
                self.count(outcome, stats);
            }
            CanonicalEntity::Membership(draft) => {
                let committee_id = cache.committees.get(&draft.committee_name).copied();
                let rep_id = cache
                    .representatives
                    .get(&draft.representative_external_id)
                    .copied();
                let (Some(committee_id), Some(rep_id)) = (committee_id, rep_id) else {
                    stats.issues.push(
                        DataQualityIssue::new(
                            IssueKind::MissingRequiredField,
                            IssueSeverity::Warning,
                            format!(
                                "membership references unknown committee {} or representative {}",
                                draft.committee_name, draft.representative_external_id
                            ),
                        )
                        .for_run(run_id),
                    );
                    return Ok(());
                };
                let outcome = self
                    .store
                    .upsert_membership(
                        &mut *tx,
                        &Membership {
                            id: 0,
                            committee_id,
                            representative_id: rep_id,
                            role: draft.role.clone(),
                            start_date: draft.start_date,
                            end_date: draft.end_date,
                        },
                    )
                    .await?;
                self.count(outcome, stats);
            }
        }
        Ok(())
    }

    fn count(&self, outcome: UpsertOutcome, stats: &mut IngestStats) {
        match outcome {
            UpsertOutcome::Inserted(_) => stats.records_new += 1,
            UpsertOutcome::Updated(_) => stats.records_updated += 1,
            UpsertOutcome::Unchanged(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_support;
    use crate::core::scrapers::RawKind;
    use serde_json::json;

    fn pipeline(store: &Store) -> IngestionPipeline {
        IngestionPipeline::new(store.clone(), PendingGauge::new(), CircuitBreaker::new())
    }

    fn person(external_id: &str, name: &str, phone: Option<&str>) -> RawRecord {
        let mut fields = json!({
            "name": name,
            "external_id": external_id,
            "division": {"name": "Ottawa Centre"},
            "role": "MPP"
        });
        if let Some(phone) = phone {
            fields["phone"] = json!(phone);
        }
        RawRecord {
            kind: RawKind::Person,
            fields: fields.as_object().unwrap().clone(),
        }
    }

    async fn run_records(
        store: &Store,
        jurisdiction: &Jurisdiction,
        records: Vec<RawRecord>,
    ) -> IngestStats {
        let (tx, rx) = mpsc::channel(64);
        let p = pipeline(store);
        let consumer = tokio::spawn({
            let jurisdiction = jurisdiction.clone();
            async move { p.consume("run-1", &jurisdiction, rx).await }
        });
        for record in records {
            tx.send(record).await.unwrap();
        }
        drop(tx);
        consumer.await.unwrap()
    }

    async fn jurisdiction(store: &Store) -> Jurisdiction {
        store.find_jurisdiction_by_code("ca-on").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_ingest_counts_new_second_counts_nothing() {
        let (store, _) = test_support::store_with_jurisdiction().await;
        let j = jurisdiction(&store).await;

        let records = vec![
            person("p1", "Sandra Tremblay", None),
            person("p2", "Marc Miller", None),
            person("p3", "A Singh", None),
        ];

        let stats = run_records(&store, &j, records.clone()).await;
        assert_eq!(stats.records_found, 3);
        assert_eq!(stats.records_new, 3);
        assert_eq!(stats.records_updated, 0);
        assert!(!stats.persistence_failed);

        // identical second ingest
        let stats = run_records(&store, &j, records).await;
        assert_eq!(stats.records_new, 0);
        assert_eq!(stats.records_updated, 0);
    }

    #[tokio::test]
    async fn changed_phone_counts_one_update() {
        let (store, _) = test_support::store_with_jurisdiction().await;
        let j = jurisdiction(&store).await;

        run_records(
            &store,
            &j,
            vec![
                person("p1", "Sandra Tremblay", Some("613-555-0100")),
                person("p2", "Marc Miller", None),
            ],
        )
        .await;

        let stats = run_records(
            &store,
            &j,
            vec![
                person("p1", "Sandra Tremblay", Some("613-555-0199")),
                person("p2", "Marc Miller", None),
            ],
        )
        .await;
        assert_eq!(stats.records_new, 0);
        assert_eq!(stats.records_updated, 1);
    }

    #[tokio::test]
    async fn fingerprint_collision_merges_with_warning() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let j = jurisdiction(&store).await;

        // same person under two external ids
        let stats = run_records(
            &store,
            &j,
            vec![
                person("p1", "Sandra Tremblay", None),
                person("p1-dup", "Sandra Tremblay", Some("613-555-0100")),
            ],
        )
        .await;

        assert!(stats
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::DuplicateCollision
                && i.severity == IssueSeverity::Warning));

        // merged into one row carrying the union of fields
        let reps = store.list_representatives(jid).await.unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].external_id, "p1");
        assert_eq!(reps[0].phone.as_deref(), Some("613-555-0100"));
    }

    #[tokio::test]
    async fn bill_regression_keeps_row_and_records_error() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let j = jurisdiction(&store).await;

        let bill = |status: &str| RawRecord {
            kind: RawKind::Bill,
            fields: json!({
                "number": "11",
                "title": "An Act",
                "session": "43-1",
                "status": status
            })
            .as_object()
            .unwrap()
            .clone(),
        };

        run_records(&store, &j, vec![bill("committee")]).await;
        let stats = run_records(&store, &j, vec![bill("first reading")]).await;

        assert!(stats
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error));
        let stored = store.find_bill(jid, "11", "43-1").await.unwrap().unwrap();
        assert_eq!(stored.status, crate::core::model::BillStatus::Committee);
    }

    #[tokio::test]
    async fn event_resolves_committee_reference_within_run() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let j = jurisdiction(&store).await;

        let committee = RawRecord {
            kind: RawKind::Committee,
            fields: json!({"name": "Standing Committee on Finance"})
                .as_object()
                .unwrap()
                .clone(),
        };
        let event = RawRecord {
            kind: RawKind::Event,
            fields: json!({
                "external_id": "ev-1",
                "date": "2025-06-03",
                "category": "committee_meeting",
                "committee": {"name": "Standing Committee on Finance"}
            })
            .as_object()
            .unwrap()
            .clone(),
        };

        let stats = run_records(&store, &j, vec![committee, event]).await;
        assert_eq!(stats.records_new, 2);

        let events = store.list_events(jid).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].committee_id.is_some());
    }

    #[tokio::test]
    async fn gauge_returns_to_zero_after_consume() {
        let (store, _) = test_support::store_with_jurisdiction().await;
        let j = jurisdiction(&store).await;

        let gauge = PendingGauge::new();
        let p = IngestionPipeline::new(store.clone(), gauge.clone(), CircuitBreaker::new());

        let (tx, rx) = mpsc::channel(64);
        let consumer = tokio::spawn({
            let j = j.clone();
            async move { p.consume("run-g", &j, rx).await }
        });
        for i in 0..10 {
            tx.send(person(&format!("p{i}"), &format!("Person {i}"), None))
                .await
                .unwrap();
        }
        drop(tx);
        consumer.await.unwrap();

        assert!(gauge.is_empty());
    }

    #[test]
    fn breaker_opens_then_closes() {
        let breaker = CircuitBreaker::new();
        assert!(!breaker.is_open());
        breaker.trip(Duration::from_millis(30));
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(50));
        assert!(!breaker.is_open());
    }
}
