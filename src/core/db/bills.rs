//! Bill persistence
//!
//! Natural key is (jurisdiction, bill_number, session). Status moves only
//! forward along the declared progression; a regression leaves the row
//! untouched and surfaces as `StatusRegression` unless an admin override
//! is recorded through `override_bill_status`.

use super::error::{StoreError, StoreResult};
use super::representatives::UpsertOutcome;
use super::Store;
use crate::core::model::{Bill, BillStatus};
use chrono::Utc;
use sqlx::SqliteConnection;

impl Store {
    /// Insert or merge-update a bill inside a transaction
    pub async fn upsert_bill(
        &self,
        conn: &mut SqliteConnection,
        bill: &Bill,
    ) -> StoreResult<UpsertOutcome> {
        let existing = sqlx::query_as::<_, Bill>(
            "SELECT * FROM bills WHERE jurisdiction_id = ? AND bill_number = ? AND session = ?",
        )
        .bind(bill.jurisdiction_id)
        .bind(&bill.bill_number)
        .bind(&bill.session)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(existing) = existing else {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                INSERT INTO bills (
                    jurisdiction_id, bill_number, session, title, summary,
                    full_text, status, status_dates, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(bill.jurisdiction_id)
            .bind(&bill.bill_number)
            .bind(&bill.session)
            .bind(&bill.title)
            .bind(&bill.summary)
            .bind(&bill.full_text)
            .bind(bill.status)
            .bind(&bill.status_dates)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            return Ok(UpsertOutcome::Inserted(result.last_insert_rowid()));
        };

        if !existing.status.allows_transition_to(bill.status) {
            return Err(StoreError::StatusRegression {
                bill: format!("{}/{}", bill.bill_number, bill.session),
                from: existing.status.as_str().to_string(),
                to: bill.status.as_str().to_string(),
            });
        }

        let title = if bill.title.is_empty() {
            existing.title.clone()
        } else {
            bill.title.clone()
        };
        let summary = bill.summary.clone().or_else(|| existing.summary.clone());
        let full_text = bill.full_text.clone().or_else(|| existing.full_text.clone());
        let status_dates = bill
            .status_dates
            .clone()
            .or_else(|| existing.status_dates.clone());

        let content_changed = title != existing.title
            || summary != existing.summary
            || full_text != existing.full_text
            || bill.status != existing.status
            || status_dates != existing.status_dates;

        if !content_changed {
            return Ok(UpsertOutcome::Unchanged(existing.id));
        }

        // a replaced title or summary is recorded before it is lost
        let mut overwritten = serde_json::Map::new();
        if title != existing.title {
            overwritten.insert(
                "title".to_string(),
                serde_json::json!({"from": existing.title, "to": title}),
            );
        }
        if summary != existing.summary && existing.summary.is_some() {
            overwritten.insert(
                "summary".to_string(),
                serde_json::json!({"from": existing.summary, "to": summary}),
            );
        }
        if !overwritten.is_empty() {
            let entity_ref = format!(
                "bill:{}/{}/{}",
                existing.jurisdiction_id, existing.bill_number, existing.session
            );
            self.record_audit(
                &mut *conn,
                &entity_ref,
                "field_overwrite",
                Some(&serde_json::Value::Object(overwritten)),
                None,
            )
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE bills SET
                title = ?, summary = ?, full_text = ?,
                status = ?, status_dates = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&title)
        .bind(&summary)
        .bind(&full_text)
        .bind(bill.status)
        .bind(&status_dates)
        .bind(Utc::now())
        .bind(existing.id)
        .execute(&mut *conn)
        .await?;

        Ok(UpsertOutcome::Updated(existing.id))
    }

    /// Admin override for a status change the progression forbids
    ///
    /// The override is recorded in the audit log with its reason.
    pub async fn override_bill_status(
        &self,
        bill_id: i64,
        new_status: BillStatus,
        reason: &str,
        changed_by: &str,
    ) -> StoreResult<()> {
        let mut tx = self.begin().await?;

        let existing = sqlx::query_as::<_, Bill>("SELECT * FROM bills WHERE id = ?")
            .bind(bill_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("bill", bill_id.to_string()))?;

        sqlx::query("UPDATE bills SET status = ?, updated_at = ? WHERE id = ?")
            .bind(new_status)
            .bind(Utc::now())
            .bind(bill_id)
            .execute(&mut *tx)
            .await?;

        let entity_ref = format!(
            "bill:{}/{}/{}",
            existing.jurisdiction_id, existing.bill_number, existing.session
        );
        self.record_audit(
            &mut tx,
            &entity_ref,
            "status_override",
            Some(&serde_json::json!({
                "from": existing.status.as_str(),
                "to": new_status.as_str(),
                "reason": reason,
                "changed_by": changed_by,
            })),
            None,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::unavailable("commit status override", Some(e)))?;
        Ok(())
    }

    /// Find by natural key
    pub async fn find_bill(
        &self,
        jurisdiction_id: i64,
        bill_number: &str,
        session: &str,
    ) -> StoreResult<Option<Bill>> {
        let row = sqlx::query_as::<_, Bill>(
            "SELECT * FROM bills WHERE jurisdiction_id = ? AND bill_number = ? AND session = ?",
        )
        .bind(jurisdiction_id)
        .bind(bill_number)
        .bind(session)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Bills for a jurisdiction, newest first
    pub async fn list_bills(&self, jurisdiction_id: i64) -> StoreResult<Vec<Bill>> {
        let rows = sqlx::query_as::<_, Bill>(
            "SELECT * FROM bills WHERE jurisdiction_id = ? ORDER BY created_at DESC",
        )
        .bind(jurisdiction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Full-text search over bill titles and summaries
    #[cfg(feature = "fts")]
    pub async fn search_bills(&self, query: &str, limit: i64) -> StoreResult<Vec<Bill>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT rowid FROM bills_fts WHERE bills_fts MATCH ? LIMIT ?")
                .bind(query)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM bills WHERE id IN ({placeholders})");
        let mut query_builder = sqlx::query_as::<_, Bill>(&sql);
        for id in ids {
            query_builder = query_builder.bind(id);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;

    fn bill(jurisdiction_id: i64, number: &str, status: BillStatus) -> Bill {
        Bill {
            id: 0,
            jurisdiction_id,
            bill_number: number.to_string(),
            session: "44-1".to_string(),
            title: "An Act respecting civic data".to_string(),
            summary: None,
            full_text: None,
            status,
            status_dates: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn forward_status_transition_updates() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let first = store
            .upsert_bill(&mut conn, &bill(jid, "C-11", BillStatus::FirstReading))
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = store
            .upsert_bill(&mut conn, &bill(jid, "C-11", BillStatus::SecondReading))
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.row_id()));
    }

    #[tokio::test]
    async fn status_regression_is_rejected_without_modifying_the_row() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        store
            .upsert_bill(&mut conn, &bill(jid, "C-11", BillStatus::Committee))
            .await
            .unwrap();

        let err = store
            .upsert_bill(&mut conn, &bill(jid, "C-11", BillStatus::FirstReading))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusRegression { .. }));
        drop(conn);

        let stored = store.find_bill(jid, "C-11", "44-1").await.unwrap().unwrap();
        assert_eq!(stored.status, BillStatus::Committee);
    }

    #[tokio::test]
    async fn identical_upsert_is_unchanged() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let b = bill(jid, "C-18", BillStatus::Introduced);
        let first = store.upsert_bill(&mut conn, &b).await.unwrap();
        let second = store.upsert_bill(&mut conn, &b).await.unwrap();
        assert_eq!(second, UpsertOutcome::Unchanged(first.row_id()));
    }

    #[tokio::test]
    async fn override_records_audit_and_changes_status() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let outcome = store
            .upsert_bill(&mut conn, &bill(jid, "C-11", BillStatus::Committee))
            .await
            .unwrap();
        drop(conn);

        store
            .override_bill_status(
                outcome.row_id(),
                BillStatus::FirstReading,
                "source reverted after a clerical error",
                "admin",
            )
            .await
            .unwrap();

        let stored = store.find_bill(jid, "C-11", "44-1").await.unwrap().unwrap();
        assert_eq!(stored.status, BillStatus::FirstReading);

        let entity_ref = format!("bill:{jid}/C-11/44-1");
        let audit = store.audit_for_entity(&entity_ref).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "status_override");
    }
}
