use rust_decimal::Decimal;
use thiserror::Error;

use super::account::AccountId;
use super::money::Currency;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unbalanced transfer: {currency} legs sum to {total}")]
    Unbalanced { currency: Currency, total: Decimal },
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },
    #[error("Duplicate account: {0}")]
    DuplicateAccount(AccountId),
    #[error("Invalid amount: '{0}'")]
    InvalidAmount(String),
    #[error("Invalid currency code: '{0}'")]
    InvalidCurrency(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl LedgerError {
    pub fn infrastructure(err: impl std::fmt::Display) -> Self {
        LedgerError::Infrastructure(err.to_string())
    }

    /// True when the failure came from the persistence layer rather than the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, LedgerError::Infrastructure(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
