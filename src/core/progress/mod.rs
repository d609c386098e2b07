//! Progress Tracker
//!
//! Durable per-run and per-session progress that survives process
//! restarts. Every state transition is persisted before the next dependent
//! action: a JSON snapshot file written atomically (temp file + rename)
//! plus a mirrored store row. On restart the tracker is the source of
//! truth for what was in flight.

use crate::core::db::{Store, StoreResult};
use crate::core::model::{
    DataQualityIssue, IssueKind, IssueSeverity, PhaseKind, PhaseStatus, RunStatus, SessionStatus,
    Strategy,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Durable snapshot of one run's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub scraper_id: String,
    pub status: RunStatus,
    pub attempt: u32,
    pub records_found: i64,
    pub updated_at: DateTime<Utc>,
}

/// Durable snapshot of one session's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub strategy: Strategy,
    pub status: SessionStatus,
    pub current_phase: Option<PhaseKind>,
    /// Phase status plus the scrapers still pending in it
    pub phases: BTreeMap<PhaseKind, PhaseProgress>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub status: PhaseStatus,
    pub assigned: Vec<String>,
    pub pending: Vec<String>,
}

/// What restart recovery found
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Runs marked failed because their deadline had long passed
    pub orphaned_runs: Vec<String>,
    /// A non-terminal session to resume, if any
    pub resumable_session: Option<SessionSnapshot>,
}

/// File-plus-row durable progress store
pub struct ProgressTracker {
    dir: PathBuf,
    store: Store,
}

impl ProgressTracker {
    /// Open the tracker, creating the snapshot directory if needed
    pub fn new(dir: impl Into<PathBuf>, store: Store) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create progress directory {}", dir.display()))?;
        Ok(Self { dir, store })
    }

    /// Persist one run transition
    pub async fn record_run(&self, snapshot: &RunSnapshot) -> Result<()> {
        self.write_snapshot(&format!("run-{}", snapshot.run_id), snapshot)?;
        self.mirror_row(&format!("run-{}", snapshot.run_id), "run", snapshot)
            .await?;
        Ok(())
    }

    /// Persist one session transition
    pub async fn record_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.write_snapshot(&format!("session-{}", snapshot.session_id), snapshot)?;
        self.mirror_row(
            &format!("session-{}", snapshot.session_id),
            "session",
            snapshot,
        )
        .await?;
        Ok(())
    }

    /// Read one run snapshot; lock-free
    pub fn load_run(&self, run_id: &str) -> Option<RunSnapshot> {
        self.read_snapshot(&format!("run-{run_id}"))
    }

    /// Read one session snapshot; lock-free
    pub fn load_session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.read_snapshot(&format!("session-{session_id}"))
    }

    /// Restart recovery
    ///
    /// Non-terminal runs older than twice their timeout are marked failed
    /// with a timeout-orphan issue. A non-terminal session snapshot is
    /// returned for the phased loader to resume.
    pub async fn recover(&self, default_timeout_seconds: u64) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let cutoff = Utc::now()
            - chrono::Duration::seconds(2 * i64::try_from(default_timeout_seconds).unwrap_or(600));
        let stale = self.store.stale_nonterminal_runs(cutoff).await?;

        for run in stale {
            tracing::warn!(run = %run.id, scraper = %run.scraper_id, "orphaned run from a previous process, marking failed");
            self.store
                .finish_run(
                    &run.id,
                    RunStatus::Failed,
                    run.records_found,
                    run.records_new,
                    run.records_updated,
                    &[],
                    Some("orphaned by process restart"),
                )
                .await?;
            self.store
                .insert_issue(
                    &DataQualityIssue::new(
                        IssueKind::TimeoutOrphan,
                        IssueSeverity::Warning,
                        format!(
                            "run of {} was still {} after restart; marked failed",
                            run.scraper_id,
                            run.status.as_str()
                        ),
                    )
                    .for_run(run.id.clone()),
                )
                .await?;

            if let Some(mut snapshot) = self.load_run(&run.id) {
                snapshot.status = RunStatus::Failed;
                snapshot.updated_at = Utc::now();
                self.record_run(&snapshot).await?;
            }
            report.orphaned_runs.push(run.id);
        }

        if let Some(session) = self.store.active_session().await? {
            match self.load_session(&session.id) {
                Some(snapshot) => {
                    tracing::info!(session = %session.id, "found resumable session");
                    report.resumable_session = Some(snapshot);
                }
                None => {
                    // row without a snapshot: nothing to resume from
                    tracing::warn!(session = %session.id, "active session has no snapshot, marking failed");
                    self.store
                        .update_session_status(&session.id, SessionStatus::Failed)
                        .await?;
                }
            }
        }

        Ok(report)
    }

    /// Atomic per-key write: temp file then rename over
    fn write_snapshot<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename over {}", path.display()))?;
        Ok(())
    }

    fn read_snapshot<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let content = std::fs::read_to_string(self.key_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    async fn mirror_row<T: Serialize>(&self, key: &str, kind: &str, value: &T) -> StoreResult<()> {
        let state = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
        sqlx::query(
            r#"
            INSERT INTO progress_snapshots (key, kind, state, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                kind = excluded.kind,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(kind)
        .bind(state)
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_support;
    use crate::core::model::{Category, ScrapingRun};

    async fn tracker() -> (ProgressTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = test_support::store().await;
        let tracker = ProgressTracker::new(dir.path(), store).unwrap();
        (tracker, dir)
    }

    fn run_snapshot(run_id: &str, status: RunStatus) -> RunSnapshot {
        RunSnapshot {
            run_id: run_id.to_string(),
            scraper_id: "ca_on".to_string(),
            status,
            attempt: 1,
            records_found: 0,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn run_snapshot_round_trips_through_file() {
        let (tracker, _dir) = tracker().await;

        tracker
            .record_run(&run_snapshot("r1", RunStatus::Running))
            .await
            .unwrap();

        let loaded = tracker.load_run("r1").unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.scraper_id, "ca_on");
    }

    #[tokio::test]
    async fn snapshot_writes_are_replace_not_append() {
        let (tracker, _dir) = tracker().await;

        tracker
            .record_run(&run_snapshot("r1", RunStatus::Running))
            .await
            .unwrap();
        tracker
            .record_run(&run_snapshot("r1", RunStatus::Success))
            .await
            .unwrap();

        let loaded = tracker.load_run("r1").unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let (tracker, _dir) = tracker().await;
        assert!(tracker.load_run("nope").is_none());
        assert!(tracker.load_session("nope").is_none());
    }

    #[tokio::test]
    async fn recover_orphans_old_nonterminal_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_support::store().await;
        let tracker = ProgressTracker::new(dir.path(), store.clone()).unwrap();

        // a run that claims to be running since long ago
        let run = ScrapingRun::pending("ca_on", "ca-on", Category::Provincial);
        store.insert_run(&run).await.unwrap();
        store.mark_run_running(&run.id).await.unwrap();
        sqlx::query("UPDATE scraping_runs SET started_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::hours(3))
            .bind(&run.id)
            .execute(store.pool())
            .await
            .unwrap();

        let report = tracker.recover(300).await.unwrap();
        assert_eq!(report.orphaned_runs, vec![run.id.clone()]);

        let fetched = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Failed);
        assert!(fetched.ended_at.unwrap() >= fetched.started_at.unwrap());

        let issues = store.issues_for_run(&run.id).await.unwrap();
        assert!(issues.iter().any(|i| i.kind == IssueKind::TimeoutOrphan));
    }

    #[tokio::test]
    async fn recover_leaves_fresh_runs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_support::store().await;
        let tracker = ProgressTracker::new(dir.path(), store.clone()).unwrap();

        let run = ScrapingRun::pending("ca_qc", "ca-qc", Category::Provincial);
        store.insert_run(&run).await.unwrap();
        store.mark_run_running(&run.id).await.unwrap();

        let report = tracker.recover(300).await.unwrap();
        assert!(report.orphaned_runs.is_empty());
    }

    #[tokio::test]
    async fn recover_surfaces_resumable_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_support::store().await;
        let tracker = ProgressTracker::new(dir.path(), store.clone()).unwrap();

        let session = crate::core::model::LoadingSession {
            id: "s1".to_string(),
            strategy: Strategy::Balanced,
            started_by: "operator".to_string(),
            status: SessionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        };
        store.insert_session(&session).await.unwrap();

        let mut phases = BTreeMap::new();
        phases.insert(
            PhaseKind::FederalCore,
            PhaseProgress {
                status: PhaseStatus::Running,
                assigned: vec!["openparliament".to_string()],
                pending: vec!["openparliament".to_string()],
            },
        );
        tracker
            .record_session(&SessionSnapshot {
                session_id: "s1".to_string(),
                strategy: Strategy::Balanced,
                status: SessionStatus::Running,
                current_phase: Some(PhaseKind::FederalCore),
                phases,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let report = tracker.recover(300).await.unwrap();
        let resumable = report.resumable_session.unwrap();
        assert_eq!(resumable.session_id, "s1");
        assert_eq!(resumable.current_phase, Some(PhaseKind::FederalCore));
        assert_eq!(
            resumable.phases[&PhaseKind::FederalCore].pending,
            vec!["openparliament".to_string()]
        );
    }
}
