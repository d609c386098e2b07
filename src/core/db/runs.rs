//! Scraping-run persistence
//!
//! Run rows follow a strict lifecycle: pending, running, then exactly one
//! terminal status with `ended_at >= started_at`. A partial unique index
//! keeps at most one running row per scraper.

use super::error::{StoreError, StoreResult};
use super::Store;
use crate::core::model::{RunStatus, ScrapingRun};
use crate::core::scrapers::StructuredError;
use chrono::{DateTime, Utc};

impl Store {
    /// Insert a freshly created pending run
    pub async fn insert_run(&self, run: &ScrapingRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scraping_runs (
                id, scraper_id, jurisdiction_code, category, status,
                started_at, ended_at, records_found, records_new,
                records_updated, errors_count, error_log, summary
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.scraper_id)
        .bind(&run.jurisdiction_code)
        .bind(run.category)
        .bind(run.status)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.records_found)
        .bind(run.records_new)
        .bind(run.records_updated)
        .bind(run.errors_count)
        .bind(&run.error_log)
        .bind(&run.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a pending run to running, stamping started_at
    pub async fn mark_run_running(&self, run_id: &str) -> StoreResult<DateTime<Utc>> {
        let started_at = Utc::now();
        let affected = sqlx::query(
            "UPDATE scraping_runs SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(started_at)
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::not_found("scraping_run (pending)", run_id));
        }
        Ok(started_at)
    }

    /// Finish a run with its terminal status and counters
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        records_found: i64,
        records_new: i64,
        records_updated: i64,
        errors: &[StructuredError],
        summary: Option<&str>,
    ) -> StoreResult<()> {
        debug_assert!(status.is_terminal(), "finish_run requires a terminal status");

        let error_log = if errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string()))
        };

        // ended_at never precedes started_at, even across clock hiccups
        sqlx::query(
            r#"
            UPDATE scraping_runs SET
                status = ?,
                ended_at = MAX(?, COALESCE(started_at, ?)),
                records_found = ?,
                records_new = ?,
                records_updated = ?,
                errors_count = ?,
                error_log = ?,
                summary = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(records_found)
        .bind(records_new)
        .bind(records_updated)
        .bind(errors.len() as i64)
        .bind(error_log)
        .bind(summary)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one run
    pub async fn get_run(&self, run_id: &str) -> StoreResult<Option<ScrapingRun>> {
        let row = sqlx::query_as::<_, ScrapingRun>("SELECT * FROM scraping_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Most recently started runs
    pub async fn recent_runs(&self, limit: i64) -> StoreResult<Vec<ScrapingRun>> {
        let rows = sqlx::query_as::<_, ScrapingRun>(
            "SELECT * FROM scraping_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Count of runs currently in a given status
    pub async fn count_runs_in_status(&self, status: RunStatus) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scraping_runs WHERE status = ?")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Non-terminal runs whose deadline has long passed, for restart
    /// recovery
    pub async fn stale_nonterminal_runs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<ScrapingRun>> {
        let rows = sqlx::query_as::<_, ScrapingRun>(
            r#"
            SELECT * FROM scraping_runs
            WHERE status IN ('pending', 'running')
              AND (started_at IS NULL OR started_at < ?)
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
