use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::admin_service::AdminService;
use crate::services::balance_service::BalanceService;
use crate::services::notification_service::{NotificationQueue, Notifier};
use crate::services::payment_service::PaymentService;
use crate::services::referral_service::ReferralService;
use crate::services::subscription_service::SubscriptionService;
use crate::services::user_locks::UserLocks;
use crate::services::user_service::UserService;
use crate::settings::Config;

/// Every service shares one pool, one config and one lock registry.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub users: UserService,
    pub balance: BalanceService,
    pub subscriptions: SubscriptionService,
    pub payments: PaymentService,
    pub referrals: ReferralService,
    pub admin: AdminService,
    pub notifications: NotificationQueue,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Arc<Config>, notifier: Arc<dyn Notifier>) -> Self {
        let locks = UserLocks::new();
        let notifications = NotificationQueue::new(notifier.clone());

        let users = UserService::new(pool.clone(), config.clone());
        let balance = BalanceService::new(pool.clone(), config.clone(), locks.clone());
        let referrals = ReferralService::new(pool.clone(), config.clone());
        let subscriptions =
            SubscriptionService::new(pool.clone(), config.clone(), locks.clone(), notifier);
        let payments = PaymentService::new(
            pool.clone(),
            config.clone(),
            balance.clone(),
            referrals.clone(),
            locks.clone(),
            notifications.clone(),
        );
        let admin = AdminService::new(
            pool.clone(),
            config.clone(),
            subscriptions.clone(),
            referrals.clone(),
            locks,
        );

        Self {
            pool,
            config,
            users,
            balance,
            subscriptions,
            payments,
            referrals,
            admin,
            notifications,
        }
    }
}
