use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use super::error::{LedgerError, Result};

/// ISO-4217 style currency code, always three upper-case ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::InvalidCurrency(code.to_string()));
        }
        Ok(Currency(code.to_ascii_uppercase()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// An exact decimal amount tagged with its currency.
///
/// Equality compares the numeric value, so `5.0 EUR == 5.00 EUR`. Arithmetic
/// between different currencies is refused rather than converted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoneyValue {
    amount: Decimal,
    currency: Currency,
}

impl MoneyValue {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        MoneyValue { amount, currency }
    }

    /// Parses a decimal string such as `"-10.50"`. Exponent and float notations are rejected.
    pub fn parse(amount: &str, currency: &str) -> Result<Self> {
        let currency = Currency::new(currency)?;
        let amount = parse_amount(amount)?;
        Ok(MoneyValue { amount, currency })
    }

    pub fn zero(currency: Currency) -> Self {
        MoneyValue {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn checked_add(&self, rhs: &MoneyValue) -> Result<MoneyValue> {
        self.ensure_same_currency(rhs)?;
        let amount = self.amount.checked_add(rhs.amount).ok_or_else(|| {
            LedgerError::InvalidAmount(format!("{} + {}", self.amount, rhs.amount))
        })?;
        Ok(MoneyValue::new(amount, self.currency.clone()))
    }

    pub fn checked_sub(&self, rhs: &MoneyValue) -> Result<MoneyValue> {
        self.checked_add(&-rhs.clone())
    }

    /// Currency-checked comparison; `PartialOrd` returns `None` for the same case.
    pub fn compare(&self, rhs: &MoneyValue) -> Result<Ordering> {
        self.ensure_same_currency(rhs)?;
        Ok(self.amount.cmp(&rhs.amount))
    }

    fn ensure_same_currency(&self, rhs: &MoneyValue) -> Result<()> {
        if self.currency != rhs.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.currency.clone(),
                found: rhs.currency.clone(),
            });
        }
        Ok(())
    }
}

impl PartialOrd for MoneyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl Neg for MoneyValue {
    type Output = MoneyValue;

    fn neg(self) -> MoneyValue {
        MoneyValue::new(-self.amount, self.currency)
    }
}

impl fmt::Display for MoneyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

pub(crate) fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'));
    if !valid {
        return Err(LedgerError::InvalidAmount(raw.to_string()));
    }
    // `from_str` would round digits past the 28th decimal place; exact parsing refuses them.
    Decimal::from_str_exact(trimmed).map_err(|_| LedgerError::InvalidAmount(raw.to_string()))
}
