use anyhow::{Context, Result};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::models::{NewSubscription, Page, Subscription, now_ts};

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: SqlitePool,
}

impl SubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_subscription(&self, new: &NewSubscription) -> Result<Subscription> {
        Self::insert(&self.pool, new).await
    }

    /// New subscriptions start with auto-renewal on.
    pub async fn insert<'e, E>(executor: E, new: &NewSubscription) -> Result<Subscription>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (tg_id, plan_id, payment_amount, subscribed_date, expires_date, is_active)
            VALUES (?, ?, ?, ?, ?, 1)
            RETURNING *
            "#,
        )
        .bind(new.tg_id)
        .bind(new.plan_id)
        .bind(new.payment_amount)
        .bind(new.subscribed_date)
        .bind(new.expires_date)
        .fetch_one(executor)
        .await
        .context("Failed to create subscription")
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        Self::find(&self.pool, id).await
    }

    pub async fn find<'e, E>(executor: E, id: i64) -> Result<Option<Subscription>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("Failed to fetch subscription by ID")
    }

    pub async fn get_all_subscriptions(&self) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch all subscriptions")
    }

    pub async fn get_user_subscriptions(&self, tg_id: i64) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE tg_id = ? ORDER BY subscribed_date DESC, id DESC",
        )
        .bind(tg_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user subscriptions")
    }

    /// Subscriptions not yet expired, whatever their auto-renewal flag.
    pub async fn get_user_active_subscriptions(&self, tg_id: i64) -> Result<Vec<Subscription>> {
        Self::active_for_user(&self.pool, tg_id, now_ts()).await
    }

    pub async fn active_for_user<'e, E>(executor: E, tg_id: i64, now: i64) -> Result<Vec<Subscription>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE tg_id = ? AND expires_date > ? ORDER BY expires_date",
        )
        .bind(tg_id)
        .bind(now)
        .fetch_all(executor)
        .await
        .context("Failed to fetch active subscriptions for user")
    }

    pub async fn edit_expires_date(&self, id: i64, new_expiry: i64) -> Result<bool> {
        Self::set_expiry(&self.pool, id, new_expiry).await
    }

    pub async fn set_expiry<'e, E>(executor: E, id: i64, new_expiry: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE subscriptions SET expires_date = ? WHERE id = ?")
            .bind(new_expiry)
            .bind(id)
            .execute(executor)
            .await
            .context("Failed to update subscription expiry")?;
        Ok(result.rows_affected() > 0)
    }

    /// Pushes the expiry out by `extend_by` seconds while the subscription is
    /// still live at `now`. With `auto_renewal_only` a subscription whose flag
    /// was switched off is left alone too. `None` when nothing was updated.
    pub async fn extend_if_live<'e, E>(
        executor: E,
        id: i64,
        extend_by: i64,
        now: i64,
        auto_renewal_only: bool,
    ) -> Result<Option<Subscription>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = if auto_renewal_only {
            r#"
            UPDATE subscriptions SET expires_date = expires_date + ?
            WHERE id = ? AND expires_date > ? AND is_active = 1
            RETURNING *
            "#
        } else {
            r#"
            UPDATE subscriptions SET expires_date = expires_date + ?
            WHERE id = ? AND expires_date > ?
            RETURNING *
            "#
        };

        sqlx::query_as::<_, Subscription>(sql)
            .bind(extend_by)
            .bind(id)
            .bind(now)
            .fetch_optional(executor)
            .await
            .context("Failed to extend subscription")
    }

    /// Flips the auto-renewal flag in one statement. Returns the new value,
    /// `None` for an unknown id.
    pub async fn switch_active(&self, id: i64) -> Result<Option<bool>> {
        sqlx::query_scalar::<_, bool>(
            "UPDATE subscriptions SET is_active = NOT is_active WHERE id = ? RETURNING is_active",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to toggle subscription auto-renewal")
    }

    /// Flips the flag only while the subscription is live. `None` when the id
    /// is unknown or the subscription has already expired.
    pub async fn switch_active_if_live(&self, id: i64, now: i64) -> Result<Option<bool>> {
        sqlx::query_scalar::<_, bool>(
            r#"
            UPDATE subscriptions SET is_active = NOT is_active
            WHERE id = ? AND expires_date > ?
            RETURNING is_active
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to toggle subscription auto-renewal")
    }

    /// Auto-renewing subscriptions that are still live but expire by `until`.
    pub async fn get_expiring_auto_renewals(&self, now: i64, until: i64) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE is_active = 1 AND expires_date > ? AND expires_date <= ?
            ORDER BY expires_date
            "#,
        )
        .bind(now)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expiring auto-renewals")
    }

    pub async fn list(&self, page: i64, per_page: i64) -> Result<Page<Subscription>> {
        let (page, per_page, offset) = Page::<Subscription>::window(page, per_page);

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count subscriptions")?;

        let items = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list subscriptions")?;

        Ok(Page { items, page, per_page, total })
    }
}
