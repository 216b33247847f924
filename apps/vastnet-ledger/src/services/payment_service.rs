use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use vastnet_db::models::payment::payload;
use vastnet_db::models::{NewPayment, Payment, now_ts};
use vastnet_db::repositories::{PaymentRepository, UserRepository};
use vastnet_shared::ReferralRates;

use crate::error::{Entity, LedgerError, LedgerResult, ValidationError};
use crate::services::balance_service::BalanceService;
use crate::services::notification_service::{NotificationQueue, referral_bonus_message};
use crate::services::referral_service::ReferralService;
use crate::services::user_locks::UserLocks;
use crate::services::user_service::log_interaction;
use crate::settings::Config;

/// What a frontend needs to issue a provider invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceIntent {
    pub tg_id: i64,
    pub amount: i64,
    /// `amount` in provider minor units.
    pub provider_amount: i64,
    pub currency: String,
    pub payload: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralBonus {
    pub referrer_id: i64,
    pub amount: i64,
    pub is_first: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub payment: Payment,
    /// The provider id was already settled; nothing was credited this time.
    pub duplicate: bool,
    pub bonus: Option<ReferralBonus>,
}

#[derive(Clone)]
pub struct PaymentService {
    pool: SqlitePool,
    config: Arc<Config>,
    users: UserRepository,
    payments: PaymentRepository,
    balance: BalanceService,
    referrals: ReferralService,
    locks: UserLocks,
    notifications: NotificationQueue,
}

impl PaymentService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        balance: BalanceService,
        referrals: ReferralService,
        locks: UserLocks,
        notifications: NotificationQueue,
    ) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            pool,
            config,
            balance,
            referrals,
            locks,
            notifications,
        }
    }

    /// Preset top-up buttons: one per distinct plan cost, ascending.
    pub fn top_up_presets(&self) -> Vec<i64> {
        let mut presets: Vec<i64> = self.config.catalog.plans.iter().map(|p| p.cost()).collect();
        presets.sort_unstable();
        presets.dedup();
        presets
    }

    /// Optimistic check at invoice time.
    pub async fn request_deposit(&self, tg_id: i64, amount: i64) -> LedgerResult<InvoiceIntent> {
        let user = self
            .users
            .get_user(tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))?;
        log_interaction(&user, &format!("request_deposit(amount={})", amount));

        self.balance.validate_deposit(tg_id, amount).await?;

        let catalog = &self.config.catalog;
        let label = catalog.format_amount(amount);
        Ok(InvoiceIntent {
            tg_id,
            amount,
            provider_amount: catalog.to_provider_amount(amount),
            currency: catalog.currency.clone(),
            payload: payload::deposit(tg_id, amount),
            title: "Пополнение баланса".to_string(),
            description: format!("Счёт на сумму {}", label),
        })
    }

    /// Authoritative check before the provider moves funds. Amounts are in
    /// internal units.
    pub async fn authorize_payment(&self, tg_id: i64, amount: i64) -> bool {
        match self.balance.validate_deposit(tg_id, amount).await {
            Ok(()) => true,
            Err(LedgerError::Persistence(e)) => {
                error!("Pre-checkout for {} failed: {:#}", tg_id, e);
                false
            }
            Err(_) => false,
        }
    }

    /// Pre-checkout against a provider total. Returns the amount in internal
    /// units, or the reason to decline with.
    pub async fn pre_checkout(&self, tg_id: i64, provider_total: i64, currency: &str) -> LedgerResult<i64> {
        let catalog = &self.config.catalog;
        if currency != catalog.currency {
            warn!("Pre-checkout for {} in {} declined, expected {}", tg_id, currency, catalog.currency);
            return Err(ValidationError::CurrencyMismatch {
                expected: catalog.currency.clone(),
                got: currency.to_string(),
            }
            .into());
        }
        let amount = catalog
            .from_provider_amount(provider_total)
            .ok_or(ValidationError::UnalignedProviderAmount(provider_total))?;

        self.balance.validate_deposit(tg_id, amount).await?;
        info!("Pre-checkout for {} authorized: {}", tg_id, catalog.format_amount(amount));
        Ok(amount)
    }

    /// Records a captured payment, credits the payer and pays the referral
    /// bonus, all in one transaction. A replayed `provider_id` returns the
    /// original payment without crediting again. The referrer is notified in
    /// the background.
    pub async fn settle_payment(
        &self,
        tg_id: i64,
        amount: i64,
        currency: &str,
        provider_id: &str,
    ) -> LedgerResult<Settlement> {
        if amount <= 0 {
            return Err(ValidationError::NonPositive.into());
        }
        let user = self
            .users
            .get_user(tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))?;
        log_interaction(&user, &format!("settle_payment(amount={}, provider_id={})", amount, provider_id));
        if currency != self.config.catalog.currency {
            error!(
                "Provider charge {} for {} settled in {}, expected {}; recording as received",
                provider_id, tg_id, currency, self.config.catalog.currency
            );
        }

        let referral: Option<(i64, ReferralRates)> = match user.referrer_id {
            Some(referrer_id) => Some((referrer_id, self.referrals.rates_for(referrer_id).await?)),
            None => None,
        };

        let guard = self.locks.acquire(tg_id).await;
        let mut tx = self.pool.begin().await.context("Failed to begin settlement")?;

        let new = NewPayment {
            tg_id,
            amount,
            currency: currency.to_string(),
            payload: payload::deposit(tg_id, amount),
            provider_id: Some(provider_id.to_string()),
            date: now_ts(),
        };

        let Some(payment) = BalanceService::record_credit(&mut *tx, &new).await? else {
            tx.rollback().await.context("Failed to roll back settlement")?;
            drop(guard);
            let existing = PaymentRepository::find_by_provider_id(&self.pool, provider_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Settled payment {} not found", provider_id))?;
            if existing.tg_id != tg_id {
                error!(
                    "Provider charge {} replayed for {} but belongs to {}",
                    provider_id, tg_id, existing.tg_id
                );
            } else {
                warn!("Provider charge {} already settled as payment #{}", provider_id, existing.id);
            }
            return Ok(Settlement {
                payment: existing,
                duplicate: true,
                bonus: None,
            });
        };

        let is_first = PaymentRepository::count_settled(&mut *tx, tg_id).await? == 1;

        let mut bonus = None;
        if let Some((referrer_id, rates)) = referral {
            let value = rates.select(is_first).apply(amount);
            if value <= 0 {
                info!("No referral bonus for {} on payment #{}", referrer_id, payment.id);
            } else if !UserRepository::credit(&mut *tx, referrer_id, value).await? {
                warn!("Referrer {} of {} no longer exists, bonus skipped", referrer_id, tg_id);
            } else {
                PaymentRepository::insert(
                    &mut *tx,
                    &NewPayment {
                        tg_id: referrer_id,
                        amount: value,
                        currency: currency.to_string(),
                        payload: payload::referral(tg_id, is_first),
                        provider_id: None,
                        date: payment.date,
                    },
                )
                .await?
                .ok_or_else(|| anyhow::anyhow!("Referral bonus for {} was not recorded", referrer_id))?;
                bonus = Some(ReferralBonus {
                    referrer_id,
                    amount: value,
                    is_first,
                });
            }
        }

        tx.commit().await.context("Failed to commit settlement")?;
        drop(guard);

        info!(
            "Settled {} for {} (payment #{}, first: {})",
            self.config.catalog.format_amount(amount),
            user.display(),
            payment.id,
            is_first
        );
        self.warn_if_over_ceiling(tg_id).await;

        if let Some(bonus) = &bonus {
            info!(
                "Referral bonus {} credited to {} from {}",
                bonus.amount, bonus.referrer_id, tg_id
            );
            let text = referral_bonus_message(&self.config.catalog.format_amount(bonus.amount), bonus.is_first);
            self.notifications.send(bonus.referrer_id, text);
        }

        Ok(Settlement {
            payment,
            duplicate: false,
            bonus,
        })
    }

    pub async fn get_payment(&self, id: i64) -> LedgerResult<Payment> {
        self.payments
            .get_payment(id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Payment(id)))
    }

    pub async fn get_user_payments(&self, tg_id: i64) -> LedgerResult<Vec<Payment>> {
        Ok(self.payments.get_user_payments(tg_id).await?)
    }

    pub async fn check_has_settled_payment(&self, tg_id: i64) -> LedgerResult<bool> {
        Ok(self.payments.check_has_settled_payment(tg_id).await?)
    }

    /// Captured money is always credited; a balance above the ceiling here
    /// means pre-checkout was skipped or raced.
    async fn warn_if_over_ceiling(&self, tg_id: i64) {
        let check = async {
            let user = self.users.get_user(tg_id).await?;
            let max_allowed = self.balance.max_allowed_balance(tg_id).await?;
            Ok::<_, LedgerError>(user.map(|u| (u.balance, max_allowed)))
        };
        match check.await {
            Ok(Some((balance, max_allowed))) if balance > max_allowed => {
                warn!("Balance of {} is {} after settlement, above ceiling {}", tg_id, balance, max_allowed);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check balance ceiling for {}: {}", tg_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification_service::testing::RecordingNotifier;
    use crate::state::testing::{test_state, test_state_full};
    use vastnet_shared::ReferralPolicy;

    fn policy() -> ReferralPolicy {
        ReferralPolicy::from_json(r#"{ "multiplier_first": 0.5, "multiplier_common": 0.1 }"#).unwrap()
    }

    #[tokio::test]
    async fn invoice_intent_uses_provider_units() {
        let state = test_state().await;
        state.users.create_user(1, None, None).await.unwrap();

        let intent = state.payments.request_deposit(1, 100).await.unwrap();
        assert_eq!(intent.provider_amount, 10_000);
        assert_eq!(intent.payload, "1 100");
        assert_eq!(intent.currency, "RUB");
        assert_eq!(intent.description, "Счёт на сумму 100₽");

        assert!(matches!(
            state.payments.request_deposit(1, 50).await,
            Err(LedgerError::Validation(ValidationError::BelowMinimum { minimum: 75 }))
        ));
        assert_eq!(state.payments.top_up_presets(), vec![75, 150, 390, 720]);
    }

    #[tokio::test]
    async fn pre_checkout_declines_bad_totals() {
        let state = test_state().await;
        state.users.create_user(1, None, None).await.unwrap();

        assert_eq!(state.payments.pre_checkout(1, 10_000, "RUB").await.unwrap(), 100);
        assert!(matches!(
            state.payments.pre_checkout(1, 10_050, "RUB").await,
            Err(LedgerError::Validation(ValidationError::UnalignedProviderAmount(10_050)))
        ));
        assert!(matches!(
            state.payments.pre_checkout(1, 10_000, "USD").await,
            Err(LedgerError::Validation(ValidationError::CurrencyMismatch { .. }))
        ));
        assert!(matches!(
            state.payments.pre_checkout(1, 310_000, "RUB").await,
            Err(LedgerError::Validation(ValidationError::AboveMaximum { maximum: 3000 }))
        ));

        assert!(state.payments.authorize_payment(1, 100).await);
        assert!(!state.payments.authorize_payment(1, 50).await);
        assert!(!state.payments.authorize_payment(404, 100).await);
    }

    #[tokio::test]
    async fn settlement_pays_first_then_common_bonus() {
        let state = test_state_full(policy(), Arc::new(RecordingNotifier::default())).await;
        state.users.create_user(10, Some("referrer"), None).await.unwrap();
        state.users.create_user(11, Some("friend"), Some(10)).await.unwrap();

        let first = state.payments.settle_payment(11, 101, "RUB", "ch_1").await.unwrap();
        assert_eq!(
            first.bonus,
            Some(ReferralBonus { referrer_id: 10, amount: 50, is_first: true })
        );

        let second = state.payments.settle_payment(11, 199, "RUB", "ch_2").await.unwrap();
        assert_eq!(
            second.bonus,
            Some(ReferralBonus { referrer_id: 10, amount: 19, is_first: false })
        );

        assert_eq!(state.users.get_user(11).await.unwrap().balance, 300);
        assert_eq!(state.users.get_user(10).await.unwrap().balance, 69);
        assert!(!state.payments.check_has_settled_payment(10).await.unwrap());

        let summary = state.referrals.summary(10).await.unwrap();
        assert_eq!((summary.referrals, summary.earned), (1, 69));

        state.notifications.flush().await;
        let sent = state.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(to, _)| *to == 10));
        assert!(state.admin.audit_ledger().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_settlement_credits_once() {
        let state = test_state_full(policy(), Arc::new(RecordingNotifier::default())).await;
        state.users.create_user(10, None, None).await.unwrap();
        state.users.create_user(11, None, Some(10)).await.unwrap();

        let first = state.payments.settle_payment(11, 100, "RUB", "ch_1").await.unwrap();
        let replay = state.payments.settle_payment(11, 100, "RUB", "ch_1").await.unwrap();

        assert!(!first.duplicate);
        assert!(replay.duplicate);
        assert_eq!(replay.payment, first.payment);
        assert_eq!(replay.bonus, None);
        assert_eq!(state.users.get_user(11).await.unwrap().balance, 100);
        assert_eq!(state.users.get_user(10).await.unwrap().balance, 50);
        state.notifications.flush().await;
        assert_eq!(state.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_notification_keeps_the_bonus() {
        let state = test_state_full(policy(), Arc::new(RecordingNotifier::failing())).await;
        state.users.create_user(10, None, None).await.unwrap();
        state.users.create_user(11, None, Some(10)).await.unwrap();

        let settlement = state.payments.settle_payment(11, 100, "RUB", "ch_1").await.unwrap();
        assert!(settlement.bonus.is_some());
        assert_eq!(state.users.get_user(10).await.unwrap().balance, 50);
        state.notifications.flush().await;
        assert_eq!(state.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn zero_bonus_writes_no_row() {
        let state = test_state().await;
        state.users.create_user(10, None, None).await.unwrap();
        state.users.create_user(11, None, Some(10)).await.unwrap();

        let settlement = state.payments.settle_payment(11, 100, "RUB", "ch_1").await.unwrap();
        assert_eq!(settlement.bonus, None);
        assert!(state.payments.get_user_payments(10).await.unwrap().is_empty());
        assert_eq!(state.payments.get_payment(settlement.payment.id).await.unwrap().amount, 100);
    }

    #[tokio::test]
    async fn settlement_rejects_unknown_user_and_bad_amounts() {
        let state = test_state().await;
        assert!(matches!(
            state.payments.settle_payment(5, 100, "RUB", "ch").await,
            Err(LedgerError::NotFound(Entity::User(5)))
        ));
        state.users.create_user(5, None, None).await.unwrap();
        assert!(matches!(
            state.payments.settle_payment(5, 0, "RUB", "ch").await,
            Err(LedgerError::Validation(ValidationError::NonPositive))
        ));
    }

    #[tokio::test]
    async fn failed_bonus_insert_rolls_back_the_whole_settlement() {
        let state = test_state_full(policy(), Arc::new(RecordingNotifier::default())).await;
        state.users.create_user(10, None, None).await.unwrap();
        state.users.create_user(11, None, Some(10)).await.unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_referral_bonus BEFORE INSERT ON payments
            WHEN NEW.payload LIKE 'referral:%'
            BEGIN SELECT RAISE(ABORT, 'bonus rejected'); END
            "#,
        )
        .execute(&state.pool)
        .await
        .unwrap();

        let err = state.payments.settle_payment(11, 100, "RUB", "ch_1").await.unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));

        assert_eq!(state.users.get_user(11).await.unwrap().balance, 0);
        assert_eq!(state.users.get_user(10).await.unwrap().balance, 0);
        assert!(state.payments.get_user_payments(11).await.unwrap().is_empty());
        assert!(state.payments.get_user_payments(10).await.unwrap().is_empty());
        assert!(!state.payments.check_has_settled_payment(11).await.unwrap());

        // the provider retries once the store is healthy again
        sqlx::query("DROP TRIGGER reject_referral_bonus").execute(&state.pool).await.unwrap();
        let retry = state.payments.settle_payment(11, 100, "RUB", "ch_1").await.unwrap();
        assert!(!retry.duplicate);
        assert_eq!(retry.bonus, Some(ReferralBonus { referrer_id: 10, amount: 50, is_first: true }));
        assert!(state.admin.audit_ledger().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_currency_settlement_is_still_credited() {
        let state = test_state().await;
        state.users.create_user(1, None, None).await.unwrap();

        let settlement = state.payments.settle_payment(1, 100, "USD", "ch_usd").await.unwrap();
        assert!(!settlement.duplicate);
        assert_eq!(settlement.payment.currency, "USD");
        assert_eq!(state.users.get_user(1).await.unwrap().balance, 100);
    }
}
