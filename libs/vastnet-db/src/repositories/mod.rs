pub mod payment_repo;
pub mod referrer_repo;
pub mod subscription_repo;
pub mod user_repo;

pub use payment_repo::PaymentRepository;
pub use referrer_repo::ReferrerRepository;
pub use subscription_repo::SubscriptionRepository;
pub use user_repo::UserRepository;
