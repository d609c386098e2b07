//! Audit log
//!
//! Records bill status overrides and field overwrites from
//! last-writer-wins conflicts. Append-only.

use super::error::StoreResult;
use super::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// One audit row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub entity_ref: String,
    pub action: String,

    /// JSON detail payload (old/new values, override reason)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl Store {
    /// Append an audit entry inside a transaction
    pub async fn record_audit(
        &self,
        conn: &mut SqliteConnection,
        entity_ref: &str,
        action: &str,
        detail: Option<&serde_json::Value>,
        run_id: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (entity_ref, action, detail, run_id, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entity_ref)
        .bind(action)
        .bind(detail.map(|d| d.to_string()))
        .bind(run_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Audit entries for one entity, oldest first
    pub async fn audit_for_entity(&self, entity_ref: &str) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM audit_log WHERE entity_ref = ? ORDER BY id",
        )
        .bind(entity_ref)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
