use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only ledger row. Positive amounts credit, negative amounts debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub tg_id: i64,
    pub amount: i64,
    pub currency: String,
    pub payload: String,
    /// Gateway charge id; `None` for purchases, bonuses and adjustments.
    pub provider_id: Option<String>,
    pub date: i64,
}

impl Payment {
    pub fn is_settled(&self) -> bool {
        self.provider_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tg_id: i64,
    pub amount: i64,
    pub currency: String,
    pub payload: String,
    pub provider_id: Option<String>,
    pub date: i64,
}

/// Provenance tags written to `payments.payload`.
pub mod payload {
    pub const REFERRAL_PREFIX: &str = "referral";
    pub const ADMIN_ADJUSTMENT: &str = "admin_set_balance";
    pub const OPENING_BALANCE: &str = "opening_balance";

    /// Same shape as the invoice payload: `<tg_id> <amount>`.
    pub fn deposit(tg_id: i64, amount: i64) -> String {
        format!("{} {}", tg_id, amount)
    }

    pub fn purchase(plan_id: i64) -> String {
        format!("plans_subscribe_{}", plan_id)
    }

    pub fn renewal(subscription_id: i64) -> String {
        format!("renew_subscription_{}", subscription_id)
    }

    pub fn referral(source_tg_id: i64, is_first: bool) -> String {
        let kind = if is_first { "first" } else { "common" };
        format!("{}:{}:{}", REFERRAL_PREFIX, source_tg_id, kind)
    }
}
