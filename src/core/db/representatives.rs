//! Representative persistence
//!
//! Natural key is (jurisdiction, external_id). Upserts merge field by
//! field: a non-null incoming value wins, a null leaves the stored value
//! alone. Rows are soft-deleted after enough consecutive unobserved runs.

use super::error::StoreResult;
use super::Store;
use crate::core::model::Representative;
use chrono::Utc;
use sqlx::SqliteConnection;

/// What an upsert did to the row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    /// Matched an existing row with identical content
    Unchanged(i64),
}

impl UpsertOutcome {
    #[must_use]
    pub fn row_id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::Unchanged(id) => *id,
        }
    }
}

fn merge<T: Clone>(incoming: &Option<T>, existing: &Option<T>) -> Option<T> {
    incoming.clone().or_else(|| existing.clone())
}

impl Store {
    /// Insert or merge-update a representative inside a transaction
    pub async fn upsert_representative(
        &self,
        conn: &mut SqliteConnection,
        rep: &Representative,
    ) -> StoreResult<UpsertOutcome> {
        let existing = sqlx::query_as::<_, Representative>(
            "SELECT * FROM representatives WHERE jurisdiction_id = ? AND external_id = ?",
        )
        .bind(rep.jurisdiction_id)
        .bind(&rep.external_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(existing) = existing else {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                INSERT INTO representatives (
                    jurisdiction_id, external_id, given_name, family_name, role,
                    party, district, email, phone, office_address, social_urls,
                    photo_url, biography, term_start, term_end,
                    active, missed_runs, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
                "#,
            )
            .bind(rep.jurisdiction_id)
            .bind(&rep.external_id)
            .bind(&rep.given_name)
            .bind(&rep.family_name)
            .bind(rep.role)
            .bind(&rep.party)
            .bind(&rep.district)
            .bind(&rep.email)
            .bind(&rep.phone)
            .bind(&rep.office_address)
            .bind(&rep.social_urls)
            .bind(&rep.photo_url)
            .bind(&rep.biography)
            .bind(rep.term_start)
            .bind(rep.term_end)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            return Ok(UpsertOutcome::Inserted(result.last_insert_rowid()));
        };

        let merged = Representative {
            id: existing.id,
            jurisdiction_id: existing.jurisdiction_id,
            external_id: existing.external_id.clone(),
            given_name: rep.given_name.clone(),
            family_name: rep.family_name.clone(),
            role: rep.role,
            party: merge(&rep.party, &existing.party),
            district: merge(&rep.district, &existing.district),
            email: merge(&rep.email, &existing.email),
            phone: merge(&rep.phone, &existing.phone),
            office_address: merge(&rep.office_address, &existing.office_address),
            social_urls: merge(&rep.social_urls, &existing.social_urls),
            photo_url: merge(&rep.photo_url, &existing.photo_url),
            biography: merge(&rep.biography, &existing.biography),
            term_start: rep.term_start.or(existing.term_start),
            term_end: rep.term_end.or(existing.term_end),
            active: true,
            missed_runs: 0,
            created_at: existing.created_at,
            updated_at: existing.updated_at,
        };

        let content_changed = merged.given_name != existing.given_name
            || merged.family_name != existing.family_name
            || merged.role != existing.role
            || merged.party != existing.party
            || merged.district != existing.district
            || merged.email != existing.email
            || merged.phone != existing.phone
            || merged.office_address != existing.office_address
            || merged.social_urls != existing.social_urls
            || merged.photo_url != existing.photo_url
            || merged.biography != existing.biography
            || merged.term_start != existing.term_start
            || merged.term_end != existing.term_end;

        // an observation always clears the missed-run counter, even when
        // nothing else changed
        if !content_changed {
            if existing.missed_runs != 0 || !existing.active {
                sqlx::query(
                    "UPDATE representatives SET missed_runs = 0, active = 1 WHERE id = ?",
                )
                .bind(existing.id)
                .execute(&mut *conn)
                .await?;
            }
            return Ok(UpsertOutcome::Unchanged(existing.id));
        }

        // overwritten values go to the audit log before they are lost
        let mut overwritten = serde_json::Map::new();
        let mut note = |field: &str, old: Option<&str>, new: Option<&str>| {
            if old != new && old.is_some() {
                overwritten.insert(
                    field.to_string(),
                    serde_json::json!({"from": old, "to": new}),
                );
            }
        };
        note(
            "given_name",
            Some(existing.given_name.as_str()),
            Some(merged.given_name.as_str()),
        );
        note(
            "family_name",
            Some(existing.family_name.as_str()),
            Some(merged.family_name.as_str()),
        );
        note("party", existing.party.as_deref(), merged.party.as_deref());
        note("district", existing.district.as_deref(), merged.district.as_deref());
        note("email", existing.email.as_deref(), merged.email.as_deref());
        note("phone", existing.phone.as_deref(), merged.phone.as_deref());
        if !overwritten.is_empty() {
            let entity_ref = format!(
                "representative:{}/{}",
                existing.jurisdiction_id, existing.external_id
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
            UPDATE representatives SET
                given_name = ?, family_name = ?, role = ?,
                party = ?, district = ?, email = ?, phone = ?,
                office_address = ?, social_urls = ?, photo_url = ?, biography = ?,
                term_start = ?, term_end = ?,
                active = 1, missed_runs = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.given_name)
        .bind(&merged.family_name)
        .bind(merged.role)
        .bind(&merged.party)
        .bind(&merged.district)
        .bind(&merged.email)
        .bind(&merged.phone)
        .bind(&merged.office_address)
        .bind(&merged.social_urls)
        .bind(&merged.photo_url)
        .bind(&merged.biography)
        .bind(merged.term_start)
        .bind(merged.term_end)
        .bind(Utc::now())
        .bind(existing.id)
        .execute(&mut *conn)
        .await?;

        Ok(UpsertOutcome::Updated(existing.id))
    }

    /// Find by natural key
    pub async fn find_representative(
        &self,
        jurisdiction_id: i64,
        external_id: &str,
    ) -> StoreResult<Option<Representative>> {
        let row = sqlx::query_as::<_, Representative>(
            "SELECT * FROM representatives WHERE jurisdiction_id = ? AND external_id = ?",
        )
        .bind(jurisdiction_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Active representatives for a jurisdiction
    pub async fn list_representatives(
        &self,
        jurisdiction_id: i64,
    ) -> StoreResult<Vec<Representative>> {
        let rows = sqlx::query_as::<_, Representative>(
            "SELECT * FROM representatives WHERE jurisdiction_id = ? AND active = 1 ORDER BY family_name, given_name",
        )
        .bind(jurisdiction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Full-text search over representative names
    #[cfg(feature = "fts")]
    pub async fn search_representatives(
        &self,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<Representative>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT rowid FROM representatives_fts WHERE representatives_fts MATCH ? LIMIT ?",
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM representatives WHERE id IN ({placeholders})");
        let mut query_builder = sqlx::query_as::<_, Representative>(&sql);
        for id in ids {
            query_builder = query_builder.bind(id);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Soft-delete one representative
    pub async fn deactivate_representative(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE representatives SET active = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump the missed-run counter for active rows a run did not observe,
    /// soft-deleting those that cross the threshold. Returns how many rows
    /// were deactivated.
    pub async fn mark_unobserved_representatives(
        &self,
        jurisdiction_id: i64,
        observed_external_ids: &[String],
        threshold: i64,
    ) -> StoreResult<u64> {
        let mut tx = self.begin().await?;

        if observed_external_ids.is_empty() {
            sqlx::query(
                "UPDATE representatives SET missed_runs = missed_runs + 1 WHERE jurisdiction_id = ? AND active = 1",
            )
            .bind(jurisdiction_id)
            .execute(&mut *tx)
            .await?;
        } else {
            // dynamic IN clause with bound placeholders only
            let placeholders = observed_external_ids
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(",");
            let sql = format!(
                "UPDATE representatives SET missed_runs = missed_runs + 1 \
                 WHERE jurisdiction_id = ? AND active = 1 AND external_id NOT IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql).bind(jurisdiction_id);
            for external_id in observed_external_ids {
                query = query.bind(external_id);
            }
            query.execute(&mut *tx).await?;
        }

        let deactivated = sqlx::query(
            "UPDATE representatives SET active = 0, updated_at = ? WHERE jurisdiction_id = ? AND active = 1 AND missed_runs >= ?",
        )
        .bind(Utc::now())
        .bind(jurisdiction_id)
        .bind(threshold)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| super::StoreError::unavailable("commit unobserved sweep", Some(e)))?;

        Ok(deactivated)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use crate::core::model::RepresentativeRole;

    fn rep(jurisdiction_id: i64, external_id: &str) -> Representative {
        Representative {
            id: 0,
            jurisdiction_id,
            external_id: external_id.to_string(),
            given_name: "Sandra".to_string(),
            family_name: "Tremblay".to_string(),
            role: RepresentativeRole::Mpp,
            party: Some("Independent".to_string()),
            district: Some("Ottawa Centre".to_string()),
            email: Some("s.tremblay@ola.org".to_string()),
            phone: None,
            office_address: None,
            social_urls: None,
            photo_url: None,
            biography: None,
            term_start: None,
            term_end: None,
            active: true,
            missed_runs: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_identical_upsert_is_unchanged() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let first = store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Unchanged(first.row_id()));
    }

    #[tokio::test]
    async fn changed_field_yields_updated() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let first = store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();

        let mut changed = rep(jid, "p1");
        changed.phone = Some("613-555-0188".to_string());
        let second = store
            .upsert_representative(&mut conn, &changed)
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.row_id()));

        let fetched = store.find_representative(jid, "p1").await.unwrap().unwrap();
        assert_eq!(fetched.phone.as_deref(), Some("613-555-0188"));
    }

    #[tokio::test]
    async fn overwritten_value_lands_in_the_audit_log() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();

        let mut changed = rep(jid, "p1");
        changed.party = Some("Civic Alliance".to_string());
        store
            .upsert_representative(&mut conn, &changed)
            .await
            .unwrap();
        drop(conn);

        let entity_ref = format!("representative:{jid}/p1");
        let audit = store.audit_for_entity(&entity_ref).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "field_overwrite");
        let detail = audit[0].detail.as_ref().unwrap();
        assert!(detail.contains("Independent"));
        assert!(detail.contains("Civic Alliance"));
    }

    #[tokio::test]
    async fn null_incoming_field_preserves_stored_value() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();

        let mut sparse = rep(jid, "p1");
        sparse.email = None;
        sparse.phone = Some("613-555-0100".to_string());
        store
            .upsert_representative(&mut conn, &sparse)
            .await
            .unwrap();

        let fetched = store.find_representative(jid, "p1").await.unwrap().unwrap();
        assert_eq!(fetched.email.as_deref(), Some("s.tremblay@ola.org"));
        assert_eq!(fetched.phone.as_deref(), Some("613-555-0100"));
    }

    #[tokio::test]
    async fn unobserved_sweep_deactivates_after_threshold() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        store
            .upsert_representative(&mut conn, &rep(jid, "stays"))
            .await
            .unwrap();
        store
            .upsert_representative(&mut conn, &rep(jid, "leaves"))
            .await
            .unwrap();
        drop(conn);

        let observed = vec!["stays".to_string()];
        // two misses stay below the threshold of three
        for _ in 0..2 {
            let gone = store
                .mark_unobserved_representatives(jid, &observed, 3)
                .await
                .unwrap();
            assert_eq!(gone, 0);
        }

        let gone = store
            .mark_unobserved_representatives(jid, &observed, 3)
            .await
            .unwrap();
        assert_eq!(gone, 1);

        let active = store.list_representatives(jid).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].external_id, "stays");
    }

    #[tokio::test]
    async fn reobservation_resets_the_missed_counter() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();
        drop(conn);

        // miss twice
        store
            .mark_unobserved_representatives(jid, &[], 3)
            .await
            .unwrap();
        store
            .mark_unobserved_representatives(jid, &[], 3)
            .await
            .unwrap();

        // observed again: counter resets even though content is identical
        let mut conn = store.pool().acquire().await.unwrap();
        store
            .upsert_representative(&mut conn, &rep(jid, "p1"))
            .await
            .unwrap();
        drop(conn);

        let fetched = store.find_representative(jid, "p1").await.unwrap().unwrap();
        assert_eq!(fetched.missed_runs, 0);

        // three fresh misses are needed again
        for _ in 0..2 {
            assert_eq!(
                store
                    .mark_unobserved_representatives(jid, &[], 3)
                    .await
                    .unwrap(),
                0
            );
        }
        assert_eq!(
            store
                .mark_unobserved_representatives(jid, &[], 3)
                .await
                .unwrap(),
            1
        );
    }
}
