//! VastNet storefront ledger: user balances, provider payments, plan
//! subscriptions and referral bonuses over SQLite.

pub mod cli;
pub mod error;
pub mod services;
pub mod settings;
pub mod state;

pub use error::{Entity, LedgerError, LedgerResult, ValidationError};
pub use settings::Config;
pub use state::AppState;
