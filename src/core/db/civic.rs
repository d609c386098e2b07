//! Committee, event, vote, and link-table persistence
//!
//! Smaller entities with the same natural-key upsert discipline as
//! representatives and bills.

use super::error::StoreResult;
use super::representatives::UpsertOutcome;
use super::Store;
use crate::core::model::{Committee, Event, Membership, Sponsorship, Vote, VoteResult};
use chrono::Utc;
use sqlx::SqliteConnection;

impl Store {
    /// Insert or touch a committee by (jurisdiction, name)
    pub async fn upsert_committee(
        &self,
        conn: &mut SqliteConnection,
        committee: &Committee,
    ) -> StoreResult<UpsertOutcome> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM committees WHERE jurisdiction_id = ? AND name = ?",
        )
        .bind(committee.jurisdiction_id)
        .bind(&committee.name)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(id) = existing {
            return Ok(UpsertOutcome::Unchanged(id));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO committees (jurisdiction_id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(committee.jurisdiction_id)
        .bind(&committee.name)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(UpsertOutcome::Inserted(result.last_insert_rowid()))
    }

    /// Insert or merge-update an event by (jurisdiction, external_id)
    pub async fn upsert_event(
        &self,
        conn: &mut SqliteConnection,
        event: &Event,
    ) -> StoreResult<UpsertOutcome> {
        let existing = sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE jurisdiction_id = ? AND external_id = ?",
        )
        .bind(event.jurisdiction_id)
        .bind(&event.external_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(existing) = existing else {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                INSERT INTO events (
                    jurisdiction_id, external_id, category, title, event_date,
                    bill_id, committee_id, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.jurisdiction_id)
            .bind(&event.external_id)
            .bind(event.category)
            .bind(&event.title)
            .bind(event.event_date)
            .bind(event.bill_id)
            .bind(event.committee_id)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            return Ok(UpsertOutcome::Inserted(result.last_insert_rowid()));
        };

        let title = event.title.clone().or_else(|| existing.title.clone());
        let bill_id = event.bill_id.or(existing.bill_id);
        let committee_id = event.committee_id.or(existing.committee_id);

        let content_changed = event.category != existing.category
            || title != existing.title
            || event.event_date != existing.event_date
            || bill_id != existing.bill_id
            || committee_id != existing.committee_id;

        if !content_changed {
            return Ok(UpsertOutcome::Unchanged(existing.id));
        }

        sqlx::query(
            r#"
            UPDATE events SET
                category = ?, title = ?, event_date = ?,
                bill_id = ?, committee_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(event.category)
        .bind(&title)
        .bind(event.event_date)
        .bind(bill_id)
        .bind(committee_id)
        .bind(Utc::now())
        .bind(existing.id)
        .execute(&mut *conn)
        .await?;

        Ok(UpsertOutcome::Updated(existing.id))
    }

    /// Insert or replace a vote by (event, representative)
    pub async fn upsert_vote(
        &self,
        conn: &mut SqliteConnection,
        vote: &Vote,
    ) -> StoreResult<UpsertOutcome> {
        let existing: Option<(i64, VoteResult)> = sqlx::query_as(
            "SELECT id, result FROM votes WHERE event_id = ? AND representative_id = ?",
        )
        .bind(vote.event_id)
        .bind(vote.representative_id)
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            Some((id, result)) if result == vote.result => Ok(UpsertOutcome::Unchanged(id)),
            Some((id, _)) => {
                sqlx::query("UPDATE votes SET result = ? WHERE id = ?")
                    .bind(vote.result)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                Ok(UpsertOutcome::Updated(id))
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO votes (event_id, representative_id, result) VALUES (?, ?, ?)",
                )
                .bind(vote.event_id)
                .bind(vote.representative_id)
                .bind(vote.result)
                .execute(&mut *conn)
                .await?;
                Ok(UpsertOutcome::Inserted(result.last_insert_rowid()))
            }
        }
    }

    /// Insert or update a sponsorship link
    pub async fn upsert_sponsorship(
        &self,
        conn: &mut SqliteConnection,
        sponsorship: &Sponsorship,
    ) -> StoreResult<UpsertOutcome> {
        let existing: Option<(i64, bool)> = sqlx::query_as(
            "SELECT id, is_primary FROM sponsorships WHERE bill_id = ? AND representative_id = ?",
        )
        .bind(sponsorship.bill_id)
        .bind(sponsorship.representative_id)
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            Some((id, is_primary)) if is_primary == sponsorship.is_primary => {
                Ok(UpsertOutcome::Unchanged(id))
            }
            Some((id, _)) => {
                sqlx::query("UPDATE sponsorships SET is_primary = ? WHERE id = ?")
                    .bind(sponsorship.is_primary)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                Ok(UpsertOutcome::Updated(id))
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO sponsorships (bill_id, representative_id, is_primary) VALUES (?, ?, ?)",
                )
                .bind(sponsorship.bill_id)
                .bind(sponsorship.representative_id)
                .bind(sponsorship.is_primary)
                .execute(&mut *conn)
                .await?;
                Ok(UpsertOutcome::Inserted(result.last_insert_rowid()))
            }
        }
    }

    /// Insert or merge-update a committee membership
    pub async fn upsert_membership(
        &self,
        conn: &mut SqliteConnection,
        membership: &Membership,
    ) -> StoreResult<UpsertOutcome> {
        let existing = sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE committee_id = ? AND representative_id = ?",
        )
        .bind(membership.committee_id)
        .bind(membership.representative_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(existing) = existing else {
            let result = sqlx::query(
                "INSERT INTO memberships (committee_id, representative_id, role, start_date, end_date) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(membership.committee_id)
            .bind(membership.representative_id)
            .bind(&membership.role)
            .bind(membership.start_date)
            .bind(membership.end_date)
            .execute(&mut *conn)
            .await?;
            return Ok(UpsertOutcome::Inserted(result.last_insert_rowid()));
        };

        let role = membership.role.clone().or_else(|| existing.role.clone());
        let start_date = membership.start_date.or(existing.start_date);
        let end_date = membership.end_date.or(existing.end_date);

        if role == existing.role
            && start_date == existing.start_date
            && end_date == existing.end_date
        {
            return Ok(UpsertOutcome::Unchanged(existing.id));
        }

        sqlx::query(
            "UPDATE memberships SET role = ?, start_date = ?, end_date = ? WHERE id = ?",
        )
        .bind(&role)
        .bind(start_date)
        .bind(end_date)
        .bind(existing.id)
        .execute(&mut *conn)
        .await?;

        Ok(UpsertOutcome::Updated(existing.id))
    }

    /// Events for a jurisdiction ordered by date
    pub async fn list_events(&self, jurisdiction_id: i64) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE jurisdiction_id = ? ORDER BY event_date",
        )
        .bind(jurisdiction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use crate::core::model::EventCategory;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn committee_upsert_is_idempotent() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let committee = Committee {
            id: 0,
            jurisdiction_id: jid,
            name: "Standing Committee on Finance".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let first = store.upsert_committee(&mut conn, &committee).await.unwrap();
        let second = store.upsert_committee(&mut conn, &committee).await.unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));
        assert_eq!(second, UpsertOutcome::Unchanged(first.row_id()));
    }

    #[tokio::test]
    async fn event_merges_references() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let committee_id = store
            .upsert_committee(
                &mut conn,
                &Committee {
                    id: 0,
                    jurisdiction_id: jid,
                    name: "Finance".to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap()
            .row_id();

        let base = Event {
            id: 0,
            jurisdiction_id: jid,
            external_id: "ev-1".to_string(),
            category: EventCategory::Meeting,
            title: None,
            event_date: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            bill_id: None,
            committee_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let first = store.upsert_event(&mut conn, &base).await.unwrap();

        let mut linked = base.clone();
        linked.committee_id = Some(committee_id);
        linked.title = Some("Pre-budget consultation".to_string());
        let second = store.upsert_event(&mut conn, &linked).await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.row_id()));
        drop(conn);

        let events = store.list_events(jid).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].committee_id, Some(committee_id));
    }

    #[tokio::test]
    async fn vote_replaces_result() {
        let (store, jid) = test_support::store_with_jurisdiction().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let rep_id = {
            use crate::core::model::{Representative, RepresentativeRole};
            store
                .upsert_representative(
                    &mut conn,
                    &Representative {
                        id: 0,
                        jurisdiction_id: jid,
                        external_id: "p1".to_string(),
                        given_name: "A".to_string(),
                        family_name: "B".to_string(),
                        role: RepresentativeRole::Mpp,
                        party: None,
                        district: None,
                        email: None,
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
                    },
                )
                .await
                .unwrap()
                .row_id()
        };

        let event_id = store
            .upsert_event(
                &mut conn,
                &Event {
                    id: 0,
                    jurisdiction_id: jid,
                    external_id: "ev-vote".to_string(),
                    category: EventCategory::Vote,
                    title: None,
                    event_date: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
                    bill_id: None,
                    committee_id: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap()
            .row_id();

        let vote = Vote {
            id: 0,
            event_id,
            representative_id: rep_id,
            result: VoteResult::Yes,
        };
        let first = store.upsert_vote(&mut conn, &vote).await.unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let mut corrected = vote.clone();
        corrected.result = VoteResult::Abstain;
        let second = store.upsert_vote(&mut conn, &corrected).await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.row_id()));

        let third = store.upsert_vote(&mut conn, &corrected).await.unwrap();
        assert_eq!(third, UpsertOutcome::Unchanged(first.row_id()));
    }
}
