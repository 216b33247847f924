//! Static configuration models shared by the ledger crates: the plan
//! catalog and the referral policy.

pub mod catalog;
pub mod referral;

pub use catalog::{CatalogError, Plan, PlanCatalog};
pub use referral::{Multiplier, PolicyError, ReferralPolicy, ReferralRates, ReferrerOverride};
