use std::fmt;

/// Why an amount or balance was refused. Recoverable: the caller re-prompts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("amount is not a number")]
    NotANumber,
    #[error("amount must be positive")]
    NonPositive,
    #[error("amount is below the minimum deposit of {minimum}")]
    BelowMinimum { minimum: i64 },
    #[error("amount exceeds the maximum deposit of {maximum}")]
    AboveMaximum { maximum: i64 },
    #[error("balance cannot be negative")]
    NegativeBalance,
    #[error("unexpected currency {got}, expected {expected}")]
    CurrencyMismatch { expected: String, got: String },
    #[error("provider amount {0} is not a whole number of units")]
    UnalignedProviderAmount(i64),
}

impl ValidationError {
    /// Re-prompt text shown to the user.
    pub fn hint(&self) -> String {
        match self {
            ValidationError::NotANumber | ValidationError::NonPositive => {
                "Введите сумму целым положительным числом".to_string()
            }
            ValidationError::BelowMinimum { minimum } => {
                format!("Минимальная сумма пополнения: {}", minimum)
            }
            ValidationError::AboveMaximum { maximum } if *maximum <= 0 => {
                "Баланс уже достиг максимума".to_string()
            }
            ValidationError::AboveMaximum { maximum } => {
                format!("Сумма пополнения выше максимальной! Можно пополнить не более чем на {}", maximum)
            }
            ValidationError::NegativeBalance => "Баланс не может быть отрицательным".to_string(),
            ValidationError::CurrencyMismatch { .. } | ValidationError::UnalignedProviderAmount(_) => {
                "Платёж не может быть принят".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User(i64),
    Plan(i64),
    Subscription(i64),
    Payment(i64),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::User(id) => write!(f, "user {}", id),
            Entity::Plan(id) => write!(f, "plan {}", id),
            Entity::Subscription(id) => write!(f, "subscription {}", id),
            Entity::Payment(id) => write!(f, "payment {}", id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: i64, cost: i64, top_up: i64 },
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("subscription {0} has expired")]
    SubscriptionExpired(i64),
    #[error("{0} is not an administrator")]
    Forbidden(i64),
    #[error("storage failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl LedgerError {
    /// Whether the user can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LedgerError::Persistence(_))
    }

    /// User-facing message. Storage details never leave the process.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Validation(e) => e.hint(),
            LedgerError::InsufficientFunds { top_up, .. } => {
                format!("Недостаточно средств на балансе. Пополните баланс на {}", top_up)
            }
            LedgerError::NotFound(_) => "Недоступно".to_string(),
            LedgerError::SubscriptionExpired(_) => "Подписка истекла".to_string(),
            LedgerError::Forbidden(_) => "Команда доступна только администраторам".to_string(),
            LedgerError::Persistence(_) => "Что-то пошло не так, попробуйте позже".to_string(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_carry_computed_bounds() {
        assert!(ValidationError::BelowMinimum { minimum: 75 }.hint().contains("75"));
        assert!(ValidationError::AboveMaximum { maximum: 2900 }.hint().contains("2900"));
        assert_eq!(
            ValidationError::AboveMaximum { maximum: 0 }.hint(),
            "Баланс уже достиг максимума"
        );
    }

    #[test]
    fn persistence_errors_are_not_leaked() {
        let err = LedgerError::from(anyhow::anyhow!("disk I/O error"));
        assert!(!err.is_recoverable());
        assert!(!err.user_message().contains("disk"));
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn insufficient_funds_offers_top_up() {
        let err = LedgerError::InsufficientFunds { balance: 100, cost: 150, top_up: 75 };
        assert!(err.is_recoverable());
        assert!(err.user_message().contains("75"));
    }
}
