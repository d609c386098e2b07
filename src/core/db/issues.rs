//! Data-quality issue persistence

use super::error::StoreResult;
use super::Store;
use crate::core::model::{DataQualityIssue, IssueSeverity};
use chrono::Utc;

impl Store {
    /// Append one issue
    pub async fn insert_issue(&self, issue: &DataQualityIssue) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO data_quality_issues (
                id, run_id, severity, kind, description, entity_ref,
                detected_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&issue.id)
        .bind(&issue.run_id)
        .bind(issue.severity)
        .bind(issue.kind)
        .bind(&issue.description)
        .bind(&issue.entity_ref)
        .bind(issue.detected_at)
        .bind(issue.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append a batch of issues; used after each run
    pub async fn insert_issues(&self, issues: &[DataQualityIssue]) -> StoreResult<()> {
        for issue in issues {
            self.insert_issue(issue).await?;
        }
        Ok(())
    }

    /// Issues recorded for one run
    pub async fn issues_for_run(&self, run_id: &str) -> StoreResult<Vec<DataQualityIssue>> {
        let rows = sqlx::query_as::<_, DataQualityIssue>(
            "SELECT * FROM data_quality_issues WHERE run_id = ? ORDER BY detected_at",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Unresolved issues at or above a severity, newest first
    pub async fn open_issues(
        &self,
        min_severity: IssueSeverity,
        limit: i64,
    ) -> StoreResult<Vec<DataQualityIssue>> {
        // severity order matches the enum declaration
        let rows = sqlx::query_as::<_, DataQualityIssue>(
            r#"
            SELECT * FROM data_quality_issues
            WHERE resolved_at IS NULL
              AND CASE severity
                    WHEN 'info' THEN 0
                    WHEN 'warning' THEN 1
                    WHEN 'error' THEN 2
                    WHEN 'critical' THEN 3
                  END >= ?
            ORDER BY detected_at DESC
            LIMIT ?
            "#,
        )
        .bind(min_severity as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Mark an issue resolved
    pub async fn resolve_issue(&self, issue_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE data_quality_issues SET resolved_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(issue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
