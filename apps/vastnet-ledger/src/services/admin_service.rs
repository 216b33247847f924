use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::{info, warn};
use vastnet_db::models::{BalanceDrift, Page, Payment, StoredReferrer, Subscription, User, now_ts};
use vastnet_db::repositories::{PaymentRepository, SubscriptionRepository, UserRepository};
use vastnet_shared::Multiplier;

use crate::error::{Entity, LedgerError, LedgerResult, ValidationError};
use crate::services::referral_service::ReferralService;
use crate::services::subscription_service::SubscriptionService;
use crate::services::user_locks::UserLocks;
use crate::settings::Config;

#[derive(Clone)]
pub struct AdminService {
    pool: SqlitePool,
    config: Arc<Config>,
    users: UserRepository,
    payments: PaymentRepository,
    subscriptions: SubscriptionRepository,
    subscription_service: SubscriptionService,
    referrals: ReferralService,
    locks: UserLocks,
}

impl AdminService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        subscription_service: SubscriptionService,
        referrals: ReferralService,
        locks: UserLocks,
    ) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            pool,
            config,
            subscription_service,
            referrals,
            locks,
        }
    }

    /// Gate for every admin operation, checked against `ADMIN_LIST`.
    pub fn ensure_admin(&self, acting_id: i64) -> LedgerResult<()> {
        if self.config.is_admin(acting_id) {
            return Ok(());
        }
        warn!("{} tried to use an admin command", acting_id);
        Err(LedgerError::Forbidden(acting_id))
    }

    pub async fn list_users(&self, page: i64, per_page: i64) -> LedgerResult<Page<User>> {
        Ok(self.users.list(page, per_page).await?)
    }

    pub async fn list_payments(&self, page: i64, per_page: i64) -> LedgerResult<Page<Payment>> {
        Ok(self.payments.list(page, per_page).await?)
    }

    pub async fn list_subscriptions(&self, page: i64, per_page: i64) -> LedgerResult<Page<Subscription>> {
        Ok(self.subscriptions.list(page, per_page).await?)
    }

    /// Sets the balance outright and records the difference as an adjustment
    /// payment, so the ledger still sums to the balance.
    pub async fn admin_set_balance(&self, tg_id: i64, new_balance: i64) -> LedgerResult<User> {
        if new_balance < 0 {
            return Err(ValidationError::NegativeBalance.into());
        }

        let _guard = self.locks.acquire(tg_id).await;
        let mut tx = self.pool.begin().await.context("Failed to begin balance adjustment")?;

        let adjustment = PaymentRepository::record_adjustment(
            &mut *tx,
            tg_id,
            new_balance,
            &self.config.catalog.currency,
            now_ts(),
        )
        .await?;

        if !UserRepository::set_balance(&mut *tx, tg_id, new_balance).await? {
            tx.rollback().await.context("Failed to roll back balance adjustment")?;
            return Err(LedgerError::NotFound(Entity::User(tg_id)));
        }
        let user = UserRepository::find(&mut *tx, tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))?;

        tx.commit().await.context("Failed to commit balance adjustment")?;

        match adjustment {
            Some(row) => info!("Admin set balance of {} to {} (adjustment {:+})", user.display(), new_balance, row.amount),
            None => info!("Admin set balance of {} to {} (unchanged)", user.display(), new_balance),
        }
        Ok(user)
    }

    /// Moves the expiry to now; the subscription reads as expired immediately.
    pub async fn admin_expire_subscription(&self, subscription_id: i64) -> LedgerResult<Subscription> {
        if !self.subscriptions.edit_expires_date(subscription_id, now_ts()).await? {
            return Err(LedgerError::NotFound(Entity::Subscription(subscription_id)));
        }
        let subscription = self.subscription_service.get_subscription(subscription_id).await?;
        info!("Admin expired subscription #{} of {}", subscription_id, subscription.tg_id);
        Ok(subscription)
    }

    pub async fn admin_toggle_subscription(&self, subscription_id: i64) -> LedgerResult<bool> {
        self.subscription_service.toggle(subscription_id).await
    }

    pub async fn admin_set_referrer_override(
        &self,
        tg_id: i64,
        multiplier_first: Option<Multiplier>,
        multiplier_common: Option<Multiplier>,
    ) -> LedgerResult<Option<StoredReferrer>> {
        self.referrals.set_override(tg_id, multiplier_first, multiplier_common).await
    }

    /// Users whose balance differs from the sum of their payments.
    pub async fn audit_ledger(&self) -> LedgerResult<Vec<BalanceDrift>> {
        let drifts = self.users.balance_drifts().await?;
        for drift in &drifts {
            warn!(
                "Ledger drift for {}: balance {} but payments sum to {}",
                drift.tg_id, drift.balance, drift.ledger_sum
            );
        }
        if drifts.is_empty() {
            info!("Ledger audit clean");
        }
        Ok(drifts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::test_state;
    use vastnet_db::models::SubscriptionStatus;
    use vastnet_db::models::payment::payload;

    #[tokio::test]
    async fn set_balance_keeps_ledger_in_sync() {
        let state = test_state().await;
        state.users.create_user(1, None, None).await.unwrap();

        state.admin.admin_set_balance(1, 500).await.unwrap();
        let user = state.admin.admin_set_balance(1, 120).await.unwrap();
        assert_eq!(user.balance, 120);

        // no-op adjustment writes nothing
        state.admin.admin_set_balance(1, 120).await.unwrap();

        let payments = state.payments.get_user_payments(1).await.unwrap();
        let mut amounts: Vec<i64> = payments.iter().map(|p| p.amount).collect();
        amounts.sort();
        assert_eq!(amounts, vec![-380, 500]);
        assert!(payments.iter().all(|p| p.payload == payload::ADMIN_ADJUSTMENT));
        assert!(state.admin.audit_ledger().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_balance_validates_input() {
        let state = test_state().await;
        assert!(matches!(
            state.admin.admin_set_balance(1, -1).await,
            Err(LedgerError::Validation(ValidationError::NegativeBalance))
        ));
        assert!(matches!(
            state.admin.admin_set_balance(1, 10).await,
            Err(LedgerError::NotFound(Entity::User(1)))
        ));
    }

    #[tokio::test]
    async fn force_expire_overrides_auto_renewal() {
        let state = test_state().await;
        state.users.create_user(1, None, None).await.unwrap();
        state.admin.admin_set_balance(1, 150).await.unwrap();

        let renewing = state.subscriptions.purchase_plan(1, 0).await.unwrap();
        let cancelled = state.subscriptions.purchase_plan(1, 0).await.unwrap();
        state.admin.admin_toggle_subscription(cancelled.id).await.unwrap();

        for id in [renewing.id, cancelled.id] {
            state.admin.admin_expire_subscription(id).await.unwrap();
            let sub = state.subscriptions.get_subscription(id).await.unwrap();
            assert_eq!(sub.status(), SubscriptionStatus::Expired);
        }
        assert!(state.subscriptions.get_user_active_subscriptions(1).await.unwrap().is_empty());
        assert!(matches!(
            state.admin.admin_expire_subscription(404).await,
            Err(LedgerError::NotFound(Entity::Subscription(404)))
        ));
    }

    #[tokio::test]
    async fn audit_reports_drift() {
        let state = test_state().await;
        state.users.create_user(1, None, None).await.unwrap();
        state.users.create_user(2, None, None).await.unwrap();
        state.admin.admin_set_balance(2, 75).await.unwrap();

        // a raw write that bypasses the ledger
        UserRepository::new(state.pool.clone()).add_balance(1, 40).await.unwrap();

        let drifts = state.admin.audit_ledger().await.unwrap();
        assert_eq!(drifts, vec![BalanceDrift { tg_id: 1, balance: 40, ledger_sum: 0 }]);
    }

    #[tokio::test]
    async fn pages_and_admin_list() {
        let state = test_state().await;
        for tg_id in 1..=12 {
            state.users.create_user(tg_id, None, None).await.unwrap();
        }
        let page = state.admin.list_users(2, 10).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 12);
        assert!(!page.has_next());
        assert!(state.admin.list_users(i64::MAX, 10).await.unwrap().items.is_empty());
        assert_eq!(state.admin.list_payments(1, 10).await.unwrap().total, 0);
        assert_eq!(state.admin.list_subscriptions(1, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn only_listed_admins_pass_the_gate() {
        let state = test_state().await;
        assert!(state.admin.ensure_admin(1000).is_ok());
        let err = state.admin.ensure_admin(1).unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden(1)));
        assert!(err.is_recoverable());
    }
}
