pub mod admin_service;
pub mod balance_service;
pub mod notification_service;
pub mod payment_service;
pub mod referral_service;
pub mod subscription_service;
pub mod user_locks;
pub mod user_service;

#[cfg(test)]
mod concurrency_tests;
