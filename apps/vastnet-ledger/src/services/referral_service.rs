use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use vastnet_db::models::StoredReferrer;
use vastnet_db::repositories::{PaymentRepository, ReferrerRepository, UserRepository};
use vastnet_shared::{Multiplier, ReferralRates, ReferrerOverride};

use crate::error::{Entity, LedgerError, LedgerResult};
use crate::settings::Config;

#[derive(Debug, Clone, Serialize)]
pub struct ReferralSummary {
    pub tg_id: i64,
    pub referrals: i64,
    pub earned: i64,
    pub multiplier_first: f64,
    pub multiplier_common: f64,
}

/// Rates resolve as: admin override in the database, then the policy file
/// entry for the referrer, then the policy defaults.
#[derive(Debug, Clone)]
pub struct ReferralService {
    config: Arc<Config>,
    users: UserRepository,
    payments: PaymentRepository,
    referrers: ReferrerRepository,
}

impl ReferralService {
    pub fn new(pool: SqlitePool, config: Arc<Config>) -> Self {
        Self {
            config,
            users: UserRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            referrers: ReferrerRepository::new(pool),
        }
    }

    pub async fn rates_for(&self, referrer_id: i64) -> LedgerResult<ReferralRates> {
        let base = self.config.referral.rates_for(referrer_id);
        Ok(match self.referrers.get(referrer_id).await? {
            Some(stored) => base.overlay(&to_override(&stored)),
            None => base,
        })
    }

    pub async fn summary(&self, tg_id: i64) -> LedgerResult<ReferralSummary> {
        let rates = self.rates_for(tg_id).await?;
        Ok(ReferralSummary {
            tg_id,
            referrals: self.users.get_ref_count(tg_id).await?,
            earned: self.payments.referral_earnings(tg_id).await?,
            multiplier_first: rates.first.into(),
            multiplier_common: rates.common.into(),
        })
    }

    /// Stores an admin override. Clearing both rates removes it.
    pub async fn set_override(
        &self,
        tg_id: i64,
        multiplier_first: Option<Multiplier>,
        multiplier_common: Option<Multiplier>,
    ) -> LedgerResult<Option<StoredReferrer>> {
        if self.users.get_user(tg_id).await?.is_none() {
            return Err(LedgerError::NotFound(Entity::User(tg_id)));
        }

        if multiplier_first.is_none() && multiplier_common.is_none() {
            self.referrers.delete(tg_id).await?;
            info!("Referral override for {} cleared", tg_id);
            return Ok(None);
        }

        let stored = self
            .referrers
            .upsert(
                tg_id,
                multiplier_first.map(Multiplier::ppm),
                multiplier_common.map(Multiplier::ppm),
            )
            .await?;
        info!(
            "Referral override for {} set: first={:?} common={:?}",
            tg_id,
            multiplier_first.map(f64::from),
            multiplier_common.map(f64::from)
        );
        Ok(Some(stored))
    }
}

fn to_override(stored: &StoredReferrer) -> ReferrerOverride {
    ReferrerOverride {
        tg_id: stored.tg_id,
        multiplier_first: stored.multiplier_first_ppm.map(Multiplier::from_ppm),
        multiplier_common: stored.multiplier_common_ppm.map(Multiplier::from_ppm),
    }
}
