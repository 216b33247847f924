use serde::Serialize;
use sqlx::FromRow;

/// Admin-set referral multipliers in parts per million.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct StoredReferrer {
    pub tg_id: i64,
    pub multiplier_first_ppm: Option<i64>,
    pub multiplier_common_ppm: Option<i64>,
    pub updated_at: i64,
}
