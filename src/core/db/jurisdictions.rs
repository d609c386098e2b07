//! Jurisdiction persistence
//!
//! Jurisdictions are seeded once at registry load. Codes are immutable;
//! name and the descriptive fields follow later metadata.

use super::error::StoreResult;
use super::Store;
use crate::core::model::Jurisdiction;

impl Store {
    /// Insert or update by code, returning the row id
    pub async fn upsert_jurisdiction(&self, jurisdiction: &Jurisdiction) -> StoreResult<i64> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM jurisdictions WHERE code = ?")
                .bind(&jurisdiction.code)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(id) = existing {
            sqlx::query(
                r#"
                UPDATE jurisdictions SET
                    kind = ?,
                    name = ?,
                    parent_code = COALESCE(?, parent_code),
                    division_id = COALESCE(?, division_id),
                    website = COALESCE(?, website)
                WHERE id = ?
                "#,
            )
            .bind(jurisdiction.kind)
            .bind(&jurisdiction.name)
            .bind(&jurisdiction.parent_code)
            .bind(&jurisdiction.division_id)
            .bind(&jurisdiction.website)
            .bind(id)
            .execute(&self.pool)
            .await?;
            return Ok(id);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO jurisdictions (kind, code, name, parent_code, division_id, website)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(jurisdiction.kind)
        .bind(&jurisdiction.code)
        .bind(&jurisdiction.name)
        .bind(&jurisdiction.parent_code)
        .bind(&jurisdiction.division_id)
        .bind(&jurisdiction.website)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Find a jurisdiction by its stable code
    pub async fn find_jurisdiction_by_code(
        &self,
        code: &str,
    ) -> StoreResult<Option<Jurisdiction>> {
        let row = sqlx::query_as::<_, Jurisdiction>(
            "SELECT * FROM jurisdictions WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All jurisdictions ordered by code
    pub async fn list_jurisdictions(&self) -> StoreResult<Vec<Jurisdiction>> {
        let rows =
            sqlx::query_as::<_, Jurisdiction>("SELECT * FROM jurisdictions ORDER BY code")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}
