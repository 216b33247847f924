use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Length of one billing month, in days.
pub const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to parse plan catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("plan catalog contains no plans")]
    Empty,
    #[error("duplicate plan id {0}")]
    DuplicateId(i64),
    #[error("plan {0} must have a positive price and duration")]
    InvalidPlan(i64),
    #[error("minimum plan {0} is not in the catalog")]
    UnknownMinimumPlan(i64),
    #[error("currency multiplier must be positive")]
    InvalidMultiplier,
    #[error("max balance {max_balance} is below the minimum plan cost {minimum_cost}")]
    MaxBalanceTooLow { max_balance: i64, minimum_cost: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price of one month, in minor currency units.
    pub price: i64,
    pub months: i64,
    /// Overrides the `months * 30` subscription period when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<i64>,
}

impl Plan {
    pub fn cost(&self) -> i64 {
        self.price * self.months
    }

    pub fn period_days(&self) -> i64 {
        self.duration_days.unwrap_or(self.months * DAYS_PER_MONTH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanCatalog {
    pub currency: String,
    #[serde(default)]
    pub currency_sign: String,
    /// Provider minor units per internal unit.
    pub multiplier: i64,
    pub max_balance: i64,
    #[serde(default)]
    pub minimum_plan_id: i64,
    pub plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.plans.is_empty() {
            return Err(CatalogError::Empty);
        }
        if self.multiplier <= 0 {
            return Err(CatalogError::InvalidMultiplier);
        }

        let mut seen = HashSet::new();
        for plan in &self.plans {
            if !seen.insert(plan.id) {
                return Err(CatalogError::DuplicateId(plan.id));
            }
            if plan.price <= 0 || plan.months <= 0 || plan.period_days() <= 0 {
                return Err(CatalogError::InvalidPlan(plan.id));
            }
        }

        let minimum = self
            .minimum_plan()
            .ok_or(CatalogError::UnknownMinimumPlan(self.minimum_plan_id))?;
        if self.max_balance < minimum.cost() {
            return Err(CatalogError::MaxBalanceTooLow {
                max_balance: self.max_balance,
                minimum_cost: minimum.cost(),
            });
        }
        Ok(())
    }

    pub fn get(&self, plan_id: i64) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub fn minimum_plan(&self) -> Option<&Plan> {
        self.get(self.minimum_plan_id)
    }

    /// Smallest useful deposit: the configured minimum plan's cost, or the
    /// cheapest plan when the configured id is missing.
    pub fn minimum_cost(&self) -> i64 {
        match self.minimum_plan() {
            Some(plan) => plan.cost(),
            None => self.plans.iter().map(Plan::cost).min().unwrap_or(0),
        }
    }

    pub fn to_provider_amount(&self, amount: i64) -> i64 {
        amount * self.multiplier
    }

    /// Converts a provider total back to internal units. `None` when the total
    /// is not a whole number of internal units.
    pub fn from_provider_amount(&self, total_amount: i64) -> Option<i64> {
        if self.multiplier <= 0 || total_amount % self.multiplier != 0 {
            return None;
        }
        Some(total_amount / self.multiplier)
    }

    pub fn format_amount(&self, amount: i64) -> String {
        if self.currency_sign.is_empty() {
            format!("{} {}", amount, self.currency)
        } else {
            format!("{}{}", amount, self.currency_sign)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "currency": "RUB",
        "currency_sign": "₽",
        "multiplier": 100,
        "max_balance": 3000,
        "minimum_plan_id": 0,
        "plans": [
            { "id": 0, "name": "Month", "description": "30 days", "price": 75, "months": 1 },
            { "id": 1, "name": "Quarter", "price": 70, "months": 3 },
            { "id": 2, "name": "Half", "price": 65, "months": 6 },
            { "id": 3, "name": "Year", "price": 60, "months": 12, "duration_days": 365 }
        ]
    }"#;

    #[test]
    fn parses_catalog_and_derives_costs() {
        let catalog = PlanCatalog::from_json(CATALOG).unwrap();

        assert_eq!(catalog.plans.len(), 4);
        assert_eq!(catalog.get(1).unwrap().cost(), 210);
        assert_eq!(catalog.get(1).unwrap().period_days(), 90);
        assert_eq!(catalog.get(3).unwrap().period_days(), 365);
        assert_eq!(catalog.minimum_cost(), 75);
        assert_eq!(catalog.format_amount(150), "150₽");
    }

    #[test]
    fn provider_amount_conversion_rejects_fractions() {
        let catalog = PlanCatalog::from_json(CATALOG).unwrap();

        assert_eq!(catalog.to_provider_amount(75), 7500);
        assert_eq!(catalog.from_provider_amount(7500), Some(75));
        assert_eq!(catalog.from_provider_amount(7550), None);
    }

    #[test]
    fn rejects_duplicate_plan_ids() {
        let raw = CATALOG.replace(r#""id": 1"#, r#""id": 0"#);
        assert!(matches!(
            PlanCatalog::from_json(&raw),
            Err(CatalogError::DuplicateId(0))
        ));
    }

    #[test]
    fn rejects_unknown_minimum_plan() {
        let raw = CATALOG.replace(r#""minimum_plan_id": 0"#, r#""minimum_plan_id": 9"#);
        assert!(matches!(
            PlanCatalog::from_json(&raw),
            Err(CatalogError::UnknownMinimumPlan(9))
        ));
    }

    #[test]
    fn rejects_max_balance_below_minimum_cost() {
        let raw = CATALOG.replace(r#""max_balance": 3000"#, r#""max_balance": 50"#);
        assert!(matches!(
            PlanCatalog::from_json(&raw),
            Err(CatalogError::MaxBalanceTooLow { max_balance: 50, minimum_cost: 75 })
        ));
    }
}
