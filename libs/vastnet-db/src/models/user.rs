use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub tg_id: i64,
    pub tg_username: Option<String>,
    pub balance: i64,
    /// Set once at creation, first write wins.
    pub referrer_id: Option<i64>,
}

impl User {
    /// `@name (id)` or just the id, for interaction logs.
    pub fn display(&self) -> String {
        match self.tg_username.as_deref() {
            Some(name) if !name.is_empty() => {
                format!("@{} ({})", name.trim_start_matches('@'), self.tg_id)
            }
            _ => self.tg_id.to_string(),
        }
    }
}

/// A user whose stored balance disagrees with the sum of their payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct BalanceDrift {
    pub tg_id: i64,
    pub balance: i64,
    pub ledger_sum: i64,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub tg_id: i64,
    pub tg_username: Option<&'a str>,
    /// Recorded as an opening payment so the ledger sum matches.
    pub initial_balance: i64,
    pub referrer_id: Option<i64>,
    pub currency: &'a str,
}
