use anyhow::{Context, Result};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::models::payment::payload;
use crate::models::{NewPayment, Page, Payment};

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a ledger row. Fails on a duplicate `provider_id`; use
    /// [`PaymentRepository::insert`] where a replay must be tolerated.
    pub async fn add_payment(&self, new: &NewPayment) -> Result<Payment> {
        Self::insert(&self.pool, new)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Payment with provider id {:?} already recorded", new.provider_id))
    }

    /// `None` when a row with the same non-null `provider_id` already exists.
    pub async fn insert<'e, E>(executor: E, new: &NewPayment) -> Result<Option<Payment>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT OR IGNORE INTO payments (tg_id, amount, currency, payload, provider_id, date)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(new.tg_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(&new.payload)
        .bind(&new.provider_id)
        .bind(new.date)
        .fetch_optional(executor)
        .await
        .context("Failed to record payment")
    }

    pub async fn get_payment(&self, id: i64) -> Result<Option<Payment>> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch payment by ID")
    }

    pub async fn find_by_provider_id<'e, E>(executor: E, provider_id: &str) -> Result<Option<Payment>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE provider_id = ?")
            .bind(provider_id)
            .fetch_optional(executor)
            .await
            .context("Failed to fetch payment by provider ID")
    }

    pub async fn get_all_payments(&self) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch all payments")
    }

    pub async fn get_user_payments(&self, tg_id: i64) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE tg_id = ? ORDER BY id")
            .bind(tg_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch user payments")
    }

    /// True once the user has at least one gateway-settled payment.
    pub async fn check_has_settled_payment(&self, tg_id: i64) -> Result<bool> {
        Ok(Self::count_settled(&self.pool, tg_id).await? > 0)
    }

    pub async fn count_settled<'e, E>(executor: E, tg_id: i64) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payments WHERE tg_id = ? AND provider_id IS NOT NULL",
        )
        .bind(tg_id)
        .fetch_one(executor)
        .await
        .context("Failed to count settled payments")
    }

    /// Total referral bonus credited to `tg_id`.
    pub async fn referral_earnings(&self, tg_id: i64) -> Result<i64> {
        let pattern = format!("{}:%", payload::REFERRAL_PREFIX);
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE tg_id = ? AND payload LIKE ?",
        )
        .bind(tg_id)
        .bind(pattern)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum referral earnings")
    }

    /// Records the difference between `new_balance` and the stored balance as
    /// an admin adjustment row. Writes nothing when the user is missing or the
    /// balance is already `new_balance`.
    pub async fn record_adjustment<'e, E>(
        executor: E,
        tg_id: i64,
        new_balance: i64,
        currency: &str,
        date: i64,
    ) -> Result<Option<Payment>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (tg_id, amount, currency, payload, provider_id, date)
            SELECT tg_id, ? - balance, ?, ?, NULL, ?
            FROM users
            WHERE tg_id = ? AND balance != ?
            RETURNING *
            "#,
        )
        .bind(new_balance)
        .bind(currency)
        .bind(payload::ADMIN_ADJUSTMENT)
        .bind(date)
        .bind(tg_id)
        .bind(new_balance)
        .fetch_optional(executor)
        .await
        .context("Failed to record balance adjustment")
    }

    pub async fn list(&self, page: i64, per_page: i64) -> Result<Page<Payment>> {
        let (page, per_page, offset) = Page::<Payment>::window(page, per_page);

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count payments")?;

        let items = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list payments")?;

        Ok(Page { items, page, per_page, total })
    }
}
