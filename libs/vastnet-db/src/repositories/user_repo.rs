use anyhow::{Context, Result};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::models::payment::payload;
use crate::models::{BalanceDrift, NewPayment, NewUser, Page, User, now_ts};
use crate::repositories::PaymentRepository;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert-if-absent. An existing row is returned untouched, so the
    /// referrer and balance of the first write stick.
    pub async fn add_user(&self, new: &NewUser<'_>) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (tg_id, tg_username, balance, referrer_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tg_id) DO NOTHING
            "#,
        )
        .bind(new.tg_id)
        .bind(new.tg_username)
        .bind(new.initial_balance)
        .bind(new.referrer_id)
        .execute(&mut *tx)
        .await
        .context("Failed to add user")?
        .rows_affected()
            > 0;

        if inserted && new.initial_balance != 0 {
            PaymentRepository::insert(
                &mut *tx,
                &NewPayment {
                    tg_id: new.tg_id,
                    amount: new.initial_balance,
                    currency: new.currency.to_string(),
                    payload: payload::OPENING_BALANCE.to_string(),
                    provider_id: None,
                    date: now_ts(),
                },
            )
            .await?;
        }

        let user = Self::find(&mut *tx, new.tg_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {} not found after insert", new.tg_id))?;

        tx.commit().await?;
        Ok(user)
    }

    pub async fn get_user(&self, tg_id: i64) -> Result<Option<User>> {
        Self::find(&self.pool, tg_id).await
    }

    pub async fn find<'e, E>(executor: E, tg_id: i64) -> Result<Option<User>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE tg_id = ?")
            .bind(tg_id)
            .fetch_optional(executor)
            .await
            .context("Failed to fetch user by TG ID")
    }

    /// Unconditional write; callers check bounds first.
    pub async fn edit_balance(&self, tg_id: i64, new_balance: i64) -> Result<bool> {
        Self::set_balance(&self.pool, tg_id, new_balance).await
    }

    pub async fn add_balance(&self, tg_id: i64, delta: i64) -> Result<bool> {
        Self::credit(&self.pool, tg_id, delta).await
    }

    pub async fn reduce_balance(&self, tg_id: i64, delta: i64) -> Result<bool> {
        Self::credit(&self.pool, tg_id, -delta).await
    }

    pub async fn set_balance<'e, E>(executor: E, tg_id: i64, balance: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE users SET balance = ? WHERE tg_id = ?")
            .bind(balance)
            .bind(tg_id)
            .execute(executor)
            .await
            .context("Failed to update user balance")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn credit<'e, E>(executor: E, tg_id: i64, amount: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE users SET balance = balance + ? WHERE tg_id = ?")
            .bind(amount)
            .bind(tg_id)
            .execute(executor)
            .await
            .context("Failed to adjust user balance")?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-swap debit: applies only while the balance covers `amount`.
    /// `false` means either an unknown user or insufficient funds.
    pub async fn debit_if_covered<'e, E>(executor: E, tg_id: i64, amount: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE users SET balance = balance - ? WHERE tg_id = ? AND balance >= ?",
        )
        .bind(amount)
        .bind(tg_id)
        .bind(amount)
        .execute(executor)
        .await
        .context("Failed to debit user balance")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_ref_count(&self, tg_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE referrer_id = ?")
            .bind(tg_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count referrals")
    }

    pub async fn list(&self, page: i64, per_page: i64) -> Result<Page<User>> {
        let (page, per_page, offset) = Page::<User>::window(page, per_page);

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;

        let items = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY tg_id LIMIT ? OFFSET ?")
            .bind(per_page)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;

        Ok(Page { items, page, per_page, total })
    }

    /// Users whose balance differs from the sum of their payment rows.
    pub async fn balance_drifts(&self) -> Result<Vec<BalanceDrift>> {
        sqlx::query_as::<_, BalanceDrift>(
            r#"
            SELECT u.tg_id, u.balance, COALESCE(SUM(p.amount), 0) AS ledger_sum
            FROM users u
            LEFT JOIN payments p ON p.tg_id = u.tg_id
            GROUP BY u.tg_id, u.balance
            HAVING u.balance != COALESCE(SUM(p.amount), 0)
            ORDER BY u.tg_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute balance drifts")
    }
}
