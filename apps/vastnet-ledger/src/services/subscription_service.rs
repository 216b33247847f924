use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use vastnet_db::models::payment::payload;
use vastnet_db::models::{NewPayment, NewSubscription, Subscription, User, format_timestamp, now_ts};
use vastnet_db::repositories::{PaymentRepository, SubscriptionRepository, UserRepository};
use vastnet_shared::Plan;

use crate::error::{Entity, LedgerError, LedgerResult};
use crate::services::notification_service::Notifier;
use crate::services::user_locks::UserLocks;
use crate::services::user_service::log_interaction;
use crate::settings::Config;

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of one auto-renewal pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RenewalReport {
    pub renewed: Vec<Subscription>,
    /// `(subscription id, owner)` pairs whose owner could not cover the cost.
    pub insufficient: Vec<(i64, i64)>,
    /// Ids that expired or had auto-renewal switched off before their turn.
    pub skipped: Vec<i64>,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: SqlitePool,
    config: Arc<Config>,
    users: UserRepository,
    subscriptions: SubscriptionRepository,
    locks: UserLocks,
    notifier: Arc<dyn Notifier>,
}

impl SubscriptionService {
    pub fn new(pool: SqlitePool, config: Arc<Config>, locks: UserLocks, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            pool,
            config,
            locks,
            notifier,
        }
    }

    pub fn get_plan_catalog(&self) -> &[Plan] {
        &self.config.catalog.plans
    }

    pub fn get_plan(&self, plan_id: i64) -> LedgerResult<&Plan> {
        self.config
            .catalog
            .get(plan_id)
            .ok_or(LedgerError::NotFound(Entity::Plan(plan_id)))
    }

    pub async fn get_subscription(&self, id: i64) -> LedgerResult<Subscription> {
        self.subscriptions
            .get_subscription(id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Subscription(id)))
    }

    pub async fn get_user_subscriptions(&self, tg_id: i64) -> LedgerResult<Vec<Subscription>> {
        Ok(self.subscriptions.get_user_subscriptions(tg_id).await?)
    }

    pub async fn get_user_active_subscriptions(&self, tg_id: i64) -> LedgerResult<Vec<Subscription>> {
        Ok(self.subscriptions.get_user_active_subscriptions(tg_id).await?)
    }

    /// Debits the plan cost, records the purchase and issues the subscription
    /// in one transaction.
    pub async fn purchase_plan(&self, tg_id: i64, plan_id: i64) -> LedgerResult<Subscription> {
        let plan = self.get_plan(plan_id)?.clone();
        let cost = plan.cost();

        let _guard = self.locks.acquire(tg_id).await;
        let user = self.load_user(tg_id).await?;
        log_interaction(&user, &format!("purchase_plan(plan_id={})", plan_id));
        self.ensure_covered(&user, cost)?;

        let now = now_ts();
        let mut tx = self.pool.begin().await.context("Failed to begin purchase")?;

        if !UserRepository::debit_if_covered(&mut *tx, tg_id, cost).await? {
            tx.rollback().await.context("Failed to roll back purchase")?;
            let user = self.load_user(tg_id).await?;
            return Err(self.insufficient(&user, cost));
        }

        PaymentRepository::insert(
            &mut *tx,
            &NewPayment {
                tg_id,
                amount: -cost,
                currency: self.config.catalog.currency.clone(),
                payload: payload::purchase(plan_id),
                provider_id: None,
                date: now,
            },
        )
        .await?;

        let subscription = SubscriptionRepository::insert(
            &mut *tx,
            &NewSubscription {
                tg_id,
                plan_id,
                payment_amount: cost,
                subscribed_date: now,
                expires_date: now + plan.period_days() * SECONDS_PER_DAY,
            },
        )
        .await?;

        tx.commit().await.context("Failed to commit purchase")?;

        info!(
            "{} bought plan {} for {}, subscription #{} until {}",
            user.display(),
            plan.name,
            cost,
            subscription.id,
            format_timestamp(subscription.expires_date)
        );
        Ok(subscription)
    }

    /// Charges the plan cost again and extends the expiry by one period.
    /// An expired subscription is final and cannot be renewed.
    pub async fn renew_subscription(&self, tg_id: i64, subscription_id: i64) -> LedgerResult<Subscription> {
        let _guard = self.locks.acquire(tg_id).await;

        let subscription = self.owned_subscription(tg_id, subscription_id).await?;
        self.renew_locked(&subscription, false)
            .await?
            .ok_or(LedgerError::SubscriptionExpired(subscription_id))
    }

    /// Re-reads the subscription under the owner's lock; a flag switched off
    /// since the pass started means no charge.
    async fn auto_renew(&self, due: &Subscription) -> LedgerResult<Option<Subscription>> {
        let _guard = self.locks.acquire(due.tg_id).await;

        let current = self.get_subscription(due.id).await?;
        self.renew_locked(&current, true).await
    }

    /// Caller holds the owner's lock. `None` when the subscription is no
    /// longer renewable: expired, or with `auto_renewal_only`, switched off.
    async fn renew_locked(
        &self,
        subscription: &Subscription,
        auto_renewal_only: bool,
    ) -> LedgerResult<Option<Subscription>> {
        let plan = self.get_plan(subscription.plan_id)?.clone();
        let cost = plan.cost();

        let user = self.load_user(subscription.tg_id).await?;
        log_interaction(&user, &format!("renew_subscription(id={})", subscription.id));

        let now = now_ts();
        if subscription.is_expired_at(now) || (auto_renewal_only && !subscription.is_active) {
            warn!("Subscription #{} of {} is not renewable", subscription.id, user.display());
            return Ok(None);
        }
        self.ensure_covered(&user, cost)?;

        let mut tx = self.pool.begin().await.context("Failed to begin renewal")?;

        let Some(renewed) = SubscriptionRepository::extend_if_live(
            &mut *tx,
            subscription.id,
            plan.period_days() * SECONDS_PER_DAY,
            now,
            auto_renewal_only,
        )
        .await?
        else {
            tx.rollback().await.context("Failed to roll back renewal")?;
            warn!("Subscription #{} changed before renewal, nothing charged", subscription.id);
            return Ok(None);
        };

        if !UserRepository::debit_if_covered(&mut *tx, subscription.tg_id, cost).await? {
            tx.rollback().await.context("Failed to roll back renewal")?;
            let user = self.load_user(subscription.tg_id).await?;
            return Err(self.insufficient(&user, cost));
        }

        PaymentRepository::insert(
            &mut *tx,
            &NewPayment {
                tg_id: subscription.tg_id,
                amount: -cost,
                currency: self.config.catalog.currency.clone(),
                payload: payload::renewal(subscription.id),
                provider_id: None,
                date: now,
            },
        )
        .await?;

        tx.commit().await.context("Failed to commit renewal")?;

        info!(
            "Subscription #{} of {} renewed until {}",
            renewed.id,
            user.display(),
            format_timestamp(renewed.expires_date)
        );
        Ok(Some(renewed))
    }

    /// Flips auto-renewal for the owner. Expired subscriptions stay as they are.
    pub async fn toggle_subscription_renewal(&self, tg_id: i64, subscription_id: i64) -> LedgerResult<bool> {
        self.owned_subscription(tg_id, subscription_id).await?;
        self.toggle(subscription_id).await
    }

    pub(crate) async fn toggle(&self, subscription_id: i64) -> LedgerResult<bool> {
        match self.subscriptions.switch_active_if_live(subscription_id, now_ts()).await? {
            Some(is_active) => {
                info!("Subscription #{} auto-renewal is now {}", subscription_id, is_active);
                Ok(is_active)
            }
            None => {
                self.get_subscription(subscription_id).await?;
                warn!("Refusing to toggle expired subscription #{}", subscription_id);
                Err(LedgerError::SubscriptionExpired(subscription_id))
            }
        }
    }

    /// Renews auto-renewing subscriptions expiring within `window` seconds.
    /// Nothing here expires a subscription; expiry is read from timestamps.
    pub async fn process_auto_renewals(&self, window: i64) -> LedgerResult<RenewalReport> {
        let now = now_ts();
        let due = self.subscriptions.get_expiring_auto_renewals(now, now.saturating_add(window)).await?;
        let mut report = RenewalReport::default();

        for subscription in due {
            match self.auto_renew(&subscription).await {
                Ok(Some(renewed)) => {
                    let text = format!(
                        "Подписка #{} продлена до {}",
                        renewed.id,
                        format_timestamp(renewed.expires_date)
                    );
                    if let Err(e) = self.notifier.notify(renewed.tg_id, &text).await {
                        warn!("Failed to notify {} about renewal: {:#}", renewed.tg_id, e);
                    }
                    report.renewed.push(renewed);
                }
                Ok(None) => {
                    info!("Subscription #{} is no longer due for auto-renewal", subscription.id);
                    report.skipped.push(subscription.id);
                }
                Err(LedgerError::InsufficientFunds { balance, cost, .. }) => {
                    warn!(
                        "Cannot auto-renew subscription #{} of {}: balance {} < cost {}",
                        subscription.id, subscription.tg_id, balance, cost
                    );
                    report.insufficient.push((subscription.id, subscription.tg_id));
                }
                Err(e) => {
                    error!("Auto-renewal of subscription #{} failed: {}", subscription.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Auto-renewal pass: {} renewed, {} insufficient, {} skipped, {} failed",
            report.renewed.len(),
            report.insufficient.len(),
            report.skipped.len(),
            report.failed
        );
        Ok(report)
    }

    async fn load_user(&self, tg_id: i64) -> LedgerResult<User> {
        self.users
            .get_user(tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))
    }

    /// Another user's subscription reads as missing.
    async fn owned_subscription(&self, tg_id: i64, subscription_id: i64) -> LedgerResult<Subscription> {
        let subscription = self.get_subscription(subscription_id).await?;
        if subscription.tg_id != tg_id {
            warn!("User {} asked for subscription #{} owned by {}", tg_id, subscription_id, subscription.tg_id);
            return Err(LedgerError::NotFound(Entity::Subscription(subscription_id)));
        }
        Ok(subscription)
    }

    fn ensure_covered(&self, user: &User, cost: i64) -> LedgerResult<()> {
        if user.balance < cost {
            return Err(self.insufficient(user, cost));
        }
        Ok(())
    }

    fn insufficient(&self, user: &User, cost: i64) -> LedgerError {
        let top_up = (cost - user.balance).max(self.config.catalog.minimum_cost());
        warn!(
            "{} cannot afford {}: balance {}, suggested top-up {}",
            user.display(),
            cost,
            user.balance,
            top_up
        );
        LedgerError::InsufficientFunds {
            balance: user.balance,
            cost,
            top_up,
        }
    }
}
