use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fixed-point scale of a [`Multiplier`]: parts per million.
pub const RATE_SCALE: i64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to parse referral policy: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("referral multiplier must be a finite non-negative number, got {0}")]
    InvalidMultiplier(f64),
    #[error("referrer {0} is listed more than once")]
    DuplicateReferrer(i64),
}

/// Bonus multiplier stored as an exact parts-per-million rate, so that
/// `floor(amount * multiplier)` never suffers from float rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Multiplier(i64);

impl Multiplier {
    pub const ZERO: Multiplier = Multiplier(0);

    pub fn from_ppm(ppm: i64) -> Self {
        Self(ppm.max(0))
    }

    pub fn ppm(self) -> i64 {
        self.0
    }

    /// `floor(amount * self)`; never negative.
    pub fn apply(self, amount: i64) -> i64 {
        if amount <= 0 {
            return 0;
        }
        (i128::from(amount) * i128::from(self.0) / i128::from(RATE_SCALE)) as i64
    }
}

impl TryFrom<f64> for Multiplier {
    type Error = PolicyError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value < 0.0 {
            return Err(PolicyError::InvalidMultiplier(value));
        }
        Ok(Self((value * RATE_SCALE as f64).round() as i64))
    }
}

impl From<Multiplier> for f64 {
    fn from(value: Multiplier) -> Self {
        value.0 as f64 / RATE_SCALE as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerOverride {
    pub tg_id: i64,
    #[serde(default)]
    pub multiplier_first: Option<Multiplier>,
    #[serde(default)]
    pub multiplier_common: Option<Multiplier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferralRates {
    pub first: Multiplier,
    pub common: Multiplier,
}

impl ReferralRates {
    pub fn select(&self, is_first: bool) -> Multiplier {
        if is_first { self.first } else { self.common }
    }

    /// Fills the gaps of a partial override with these rates.
    pub fn overlay(&self, over: &ReferrerOverride) -> ReferralRates {
        ReferralRates {
            first: over.multiplier_first.unwrap_or(self.first),
            common: over.multiplier_common.unwrap_or(self.common),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralPolicy {
    pub multiplier_first: Multiplier,
    pub multiplier_common: Multiplier,
    #[serde(default)]
    pub referrers: Vec<ReferrerOverride>,
}

impl ReferralPolicy {
    /// Policy that never pays a bonus.
    pub fn disabled() -> Self {
        Self {
            multiplier_first: Multiplier::ZERO,
            multiplier_common: Multiplier::ZERO,
            referrers: Vec::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(raw)?;
        let mut seen = HashSet::new();
        for referrer in &policy.referrers {
            if !seen.insert(referrer.tg_id) {
                return Err(PolicyError::DuplicateReferrer(referrer.tg_id));
            }
        }
        Ok(policy)
    }

    pub fn defaults(&self) -> ReferralRates {
        ReferralRates {
            first: self.multiplier_first,
            common: self.multiplier_common,
        }
    }

    pub fn override_for(&self, tg_id: i64) -> Option<&ReferrerOverride> {
        self.referrers.iter().find(|r| r.tg_id == tg_id)
    }

    /// Rates for a referrer from the static file: its override, else the defaults.
    pub fn rates_for(&self, tg_id: i64) -> ReferralRates {
        match self.override_for(tg_id) {
            Some(over) => self.defaults().overlay(over),
            None => self.defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "multiplier_first": 0.5,
        "multiplier_common": 0.1,
        "referrers": [
            { "tg_id": 42, "multiplier_first": 1.0 },
            { "tg_id": 7, "multiplier_first": 0.3, "multiplier_common": 0.29 }
        ]
    }"#;

    #[test]
    fn multiplier_floors_without_float_drift() {
        let m = Multiplier::try_from(0.29).unwrap();
        assert_eq!(m.ppm(), 290_000);
        // 100 * 0.29 is 28.999999999999996 in f64
        assert_eq!(m.apply(100), 29);
        assert_eq!(Multiplier::try_from(0.1).unwrap().apply(75), 7);
        assert_eq!(Multiplier::try_from(0.5).unwrap().apply(-10), 0);
    }

    #[test]
    fn negative_multiplier_is_rejected() {
        assert!(Multiplier::try_from(-0.1).is_err());
        assert!(Multiplier::try_from(f64::NAN).is_err());
        assert!(ReferralPolicy::from_json(r#"{"multiplier_first": -1, "multiplier_common": 0}"#).is_err());
    }

    #[test]
    fn rates_fall_back_to_defaults() {
        let policy = ReferralPolicy::from_json(POLICY).unwrap();

        let partial = policy.rates_for(42);
        assert_eq!(f64::from(partial.first), 1.0);
        assert_eq!(f64::from(partial.common), 0.1);

        let full = policy.rates_for(7);
        assert_eq!(full.select(false).apply(100), 29);

        let unknown = policy.rates_for(1);
        assert_eq!(unknown, policy.defaults());
        assert_eq!(unknown.select(true).apply(101), 50);
    }

    #[test]
    fn duplicate_referrers_are_rejected() {
        let raw = POLICY.replace(r#""tg_id": 7"#, r#""tg_id": 42"#);
        assert!(matches!(
            ReferralPolicy::from_json(&raw),
            Err(PolicyError::DuplicateReferrer(42))
        ));
    }
}
