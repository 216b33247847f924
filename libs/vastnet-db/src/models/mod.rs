pub mod page;
pub mod payment;
pub mod referrer;
pub mod subscription;
pub mod user;

pub use page::Page;
pub use payment::{NewPayment, Payment};
pub use referrer::StoredReferrer;
pub use subscription::{NewSubscription, Subscription, SubscriptionStatus};
pub use user::{BalanceDrift, NewUser, User};

/// Current unix time in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `dd.mm.yy HH:MM:SS` in UTC, the format used in user-facing listings.
pub fn format_timestamp(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%d.%m.%y %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}
