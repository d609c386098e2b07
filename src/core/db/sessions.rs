//! Loading-session and phase persistence
//!
//! The phased loader writes every session and phase transition here before
//! taking the next dependent action, so a restarted process can resume.

use super::error::StoreResult;
use super::Store;
use crate::core::model::{LoadingSession, Phase, PhaseKind, PhaseStatus, SessionStatus};
use chrono::Utc;

impl Store {
    /// Insert a new session
    pub async fn insert_session(&self, session: &LoadingSession) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO loading_sessions (id, strategy, started_by, status, started_at, ended_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(session.strategy)
        .bind(&session.started_by)
        .bind(session.status)
        .bind(session.started_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update a session's status, stamping ended_at when terminal
    pub async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<()> {
        let ended_at = status.is_terminal().then(Utc::now);
        sqlx::query("UPDATE loading_sessions SET status = ?, ended_at = COALESCE(?, ended_at) WHERE id = ?")
            .bind(status)
            .bind(ended_at)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch one session
    pub async fn get_session(&self, session_id: &str) -> StoreResult<Option<LoadingSession>> {
        let row = sqlx::query_as::<_, LoadingSession>(
            "SELECT * FROM loading_sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// The non-terminal session, if one exists
    pub async fn active_session(&self) -> StoreResult<Option<LoadingSession>> {
        let row = sqlx::query_as::<_, LoadingSession>(
            "SELECT * FROM loading_sessions WHERE status IN ('running', 'paused') ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert or replace one phase row
    pub async fn upsert_phase(&self, phase: &Phase) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO phases (
                session_id, kind, status, started_at, ended_at,
                scraper_ids, progress, eta_seconds
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id, kind) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                scraper_ids = excluded.scraper_ids,
                progress = excluded.progress,
                eta_seconds = excluded.eta_seconds
            "#,
        )
        .bind(&phase.session_id)
        .bind(phase.kind)
        .bind(phase.status)
        .bind(phase.started_at)
        .bind(phase.ended_at)
        .bind(&phase.scraper_ids)
        .bind(phase.progress)
        .bind(phase.eta_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All phases of a session in declared order
    pub async fn phases_for_session(&self, session_id: &str) -> StoreResult<Vec<Phase>> {
        let mut rows = sqlx::query_as::<_, Phase>(
            "SELECT * FROM phases WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.sort_by_key(|p| p.kind);
        Ok(rows)
    }

    /// Count phases of a session in a given status
    pub async fn count_phases_in_status(
        &self,
        session_id: &str,
        status: PhaseStatus,
    ) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM phases WHERE session_id = ? AND status = ?",
        )
        .bind(session_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
