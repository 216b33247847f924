use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};
use vastnet_db::models::{NewUser, User};
use vastnet_db::repositories::UserRepository;

use crate::error::{Entity, LedgerError, LedgerResult};
use crate::settings::Config;

/// `@username (tg_id) - "operation"` line for the interaction log.
pub fn log_interaction(user: &User, operation: &str) {
    info!("{} - \"{}\"", user.display(), operation);
}

#[derive(Debug, Clone)]
pub struct UserService {
    config: Arc<Config>,
    users: UserRepository,
}

impl UserService {
    pub fn new(pool: SqlitePool, config: Arc<Config>) -> Self {
        Self {
            config,
            users: UserRepository::new(pool),
        }
    }

    /// Registers a user on first contact. Repeated calls return the stored row
    /// untouched. A referrer is kept only when it is a known user other than
    /// the new one.
    pub async fn create_user(
        &self,
        tg_id: i64,
        tg_username: Option<&str>,
        referrer_id: Option<i64>,
    ) -> LedgerResult<User> {
        let referrer_id = match referrer_id {
            Some(id) if id == tg_id => {
                warn!("User {} tried to refer themselves, ignoring referrer", tg_id);
                None
            }
            Some(id) => match self.users.get_user(id).await? {
                Some(_) => Some(id),
                None => {
                    warn!("Unknown referrer {} for user {}, ignoring", id, tg_id);
                    None
                }
            },
            None => None,
        };

        let user = self
            .users
            .add_user(&NewUser {
                tg_id,
                tg_username: tg_username.map(|n| n.trim_start_matches('@')),
                initial_balance: 0,
                referrer_id,
                currency: &self.config.catalog.currency,
            })
            .await?;

        log_interaction(&user, "start");
        Ok(user)
    }

    pub async fn get_user(&self, tg_id: i64) -> LedgerResult<User> {
        self.users
            .get_user(tg_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::User(tg_id)))
    }

    pub async fn get_ref_count(&self, tg_id: i64) -> LedgerResult<i64> {
        Ok(self.users.get_ref_count(tg_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Entity, LedgerError};
    use crate::state::testing::test_state;

    #[tokio::test]
    async fn create_user_is_idempotent() {
        let state = test_state().await;
        state.users.create_user(1, Some("@alice"), None).await.unwrap();
        state.users.create_user(2, Some("bob"), Some(1)).await.unwrap();

        let again = state.users.create_user(2, Some("robert"), None).await.unwrap();
        assert_eq!(again.referrer_id, Some(1));
        assert_eq!(again.balance, 0);
        assert_eq!(again.tg_username.as_deref(), Some("bob"));
        assert_eq!(state.users.get_ref_count(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_or_self_referrers_are_dropped() {
        let state = test_state().await;
        let own = state.users.create_user(5, None, Some(5)).await.unwrap();
        let unknown = state.users.create_user(6, None, Some(999)).await.unwrap();
        assert_eq!(own.referrer_id, None);
        assert_eq!(unknown.referrer_id, None);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let state = test_state().await;
        assert!(matches!(
            state.users.get_user(42).await,
            Err(LedgerError::NotFound(Entity::User(42)))
        ));
    }
}
