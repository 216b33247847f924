use std::sync::Arc;

use anyhow::Context;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, warn};
use vastnet_db::models::{NewPayment, Payment, now_ts};
use vastnet_db::repositories::{PaymentRepository, SubscriptionRepository, UserRepository};
use vastnet_shared::PlanCatalog;

use crate::error::{Entity, LedgerError, LedgerResult, ValidationError};
use crate::services::user_locks::UserLocks;
use crate::settings::Config;

/// Parses a typed top-up amount, telling garbage apart from non-positive numbers.
pub fn parse_amount(text: &str) -> Result<i64, ValidationError> {
    let amount: i64 = text.trim().parse().map_err(|_| ValidationError::NotANumber)?;
    if amount <= 0 {
        return Err(ValidationError::NonPositive);
    }
    Ok(amount)
}

/// The deposit bounds check. `max_allowed` is the user's balance ceiling.
pub fn check_deposit(
    catalog: &PlanCatalog,
    balance: i64,
    amount: i64,
    max_allowed: i64,
) -> Result<(), ValidationError> {
    if amount <= 0 {
        return Err(ValidationError::NonPositive);
    }
    let minimum = catalog.minimum_cost();
    if amount < minimum {
        return Err(ValidationError::BelowMinimum { minimum });
    }
    if balance.saturating_add(amount) > max_allowed {
        return Err(ValidationError::AboveMaximum {
            maximum: (max_allowed - balance).max(0),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BalanceService {
    pool: SqlitePool,
    config: Arc<Config>,
    users: UserRepository,
    locks: UserLocks,
}

impl BalanceService {
    pub fn new(pool: SqlitePool, config: Arc<Config>, locks: UserLocks) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            pool,
            config,
            locks,
        }
    }

    pub fn minimum_deposit(&self) -> i64 {
        self.config.catalog.minimum_cost()
    }

    /// `max(global max, cost of every unexpired subscription)`.
    pub async fn max_allowed_balance(&self, tg_id: i64) -> LedgerResult<i64> {
        Self::max_allowed_with(&self.pool, &self.config.catalog, tg_id, now_ts()).await
    }

    pub(crate) async fn max_allowed_with<'e, E>(
        executor: E,
        catalog: &PlanCatalog,
        tg_id: i64,
        now: i64,
    ) -> LedgerResult<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let active = SubscriptionRepository::active_for_user(executor, tg_id, now).await?;
        let committed: i64 = active
            .iter()
            .map(|sub| {
                catalog
                    .get(sub.plan_id)
                    .map(|plan| plan.cost())
                    .unwrap_or(sub.payment_amount)
            })
            .sum();
        Ok(catalog.max_balance.max(committed))
    }

    /// Same predicate at invoice time and at pre-checkout.
    pub async fn validate_deposit(&self, tg_id: i64, amount: i64) -> LedgerResult<()> {
        let user = self
            .users
            .get_user(tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))?;
        let max_allowed = self.max_allowed_balance(tg_id).await?;

        if let Err(e) = check_deposit(&self.config.catalog, user.balance, amount, max_allowed) {
            warn!(
                "Deposit of {} rejected for {}: {} (balance {}, ceiling {})",
                amount,
                user.display(),
                e,
                user.balance,
                max_allowed
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// `(minimum deposit, largest deposit that still fits under the ceiling)`.
    pub async fn deposit_bounds(&self, tg_id: i64) -> LedgerResult<(i64, i64)> {
        let user = self
            .users
            .get_user(tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))?;
        let max_allowed = self.max_allowed_balance(tg_id).await?;
        Ok((self.minimum_deposit(), (max_allowed - user.balance).max(0)))
    }

    /// Records a credit and raises the balance in one transaction. Replaying
    /// the same `provider_id` returns the original row and credits nothing.
    pub async fn apply_deposit(
        &self,
        tg_id: i64,
        amount: i64,
        currency: &str,
        provider_id: Option<&str>,
        payload: &str,
    ) -> LedgerResult<Payment> {
        if amount <= 0 {
            return Err(ValidationError::NonPositive.into());
        }
        if self.users.get_user(tg_id).await?.is_none() {
            return Err(LedgerError::NotFound(Entity::User(tg_id)));
        }

        let _guard = self.locks.acquire(tg_id).await;
        let mut tx = self.pool.begin().await.context("Failed to begin deposit")?;

        let new = NewPayment {
            tg_id,
            amount,
            currency: currency.to_string(),
            payload: payload.to_string(),
            provider_id: provider_id.map(str::to_string),
            date: now_ts(),
        };

        match Self::record_credit(&mut *tx, &new).await? {
            Some(payment) => {
                tx.commit().await.context("Failed to commit deposit")?;
                info!("Credited {} to {} (payment #{})", amount, tg_id, payment.id);
                Ok(payment)
            }
            None => {
                tx.rollback().await.context("Failed to roll back deposit")?;
                let pid = provider_id.unwrap_or_default();
                warn!("Deposit {} for {} already recorded, not crediting again", pid, tg_id);
                PaymentRepository::find_by_provider_id(&self.pool, pid)
                    .await?
                    .ok_or_else(|| LedgerError::Persistence(anyhow::anyhow!("Payment {} vanished", pid)))
            }
        }
    }

    /// Inserts the payment row first, then credits the owner. `None` when the
    /// provider id was already settled.
    pub(crate) async fn record_credit(
        conn: &mut SqliteConnection,
        new: &NewPayment,
    ) -> LedgerResult<Option<Payment>> {
        let Some(payment) = PaymentRepository::insert(&mut *conn, new).await? else {
            return Ok(None);
        };
        if !UserRepository::credit(&mut *conn, new.tg_id, new.amount).await? {
            return Err(LedgerError::NotFound(Entity::User(new.tg_id)));
        }
        Ok(Some(payment))
    }
}
