use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::{StoredReferrer, now_ts};

#[derive(Debug, Clone)]
pub struct ReferrerRepository {
    pool: SqlitePool,
}

impl ReferrerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tg_id: i64) -> Result<Option<StoredReferrer>> {
        sqlx::query_as::<_, StoredReferrer>("SELECT * FROM referrers WHERE tg_id = ?")
            .bind(tg_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch referrer override")
    }

    pub async fn upsert(
        &self,
        tg_id: i64,
        multiplier_first_ppm: Option<i64>,
        multiplier_common_ppm: Option<i64>,
    ) -> Result<StoredReferrer> {
        sqlx::query_as::<_, StoredReferrer>(
            r#"
            INSERT INTO referrers (tg_id, multiplier_first_ppm, multiplier_common_ppm, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tg_id) DO UPDATE SET
                multiplier_first_ppm = excluded.multiplier_first_ppm,
                multiplier_common_ppm = excluded.multiplier_common_ppm,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(multiplier_first_ppm)
        .bind(multiplier_common_ppm)
        .bind(now_ts())
        .fetch_one(&self.pool)
        .await
        .context("Failed to save referrer override")
    }

    pub async fn delete(&self, tg_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM referrers WHERE tg_id = ?")
            .bind(tg_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete referrer override")?;
        Ok(result.rows_affected() > 0)
    }
}
