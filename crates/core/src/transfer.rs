use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::account::AccountId;
use super::error::{LedgerError, Result};
use super::money::{Currency, MoneyValue};

/// One signed amount posted against one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub account_id: AccountId,
    pub amount: MoneyValue,
}

/// A validated multi-leg transfer. Only obtainable through [`TransferRequestBuilder::build`],
/// so every instance balances to zero in each currency it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    reference: String,
    transfer_type: String,
    legs: Vec<TransferLeg>,
    created_at: DateTime<Utc>,
}

impl TransferRequest {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn transfer_type(&self) -> &str {
        &self.transfer_type
    }

    pub fn legs(&self) -> &[TransferLeg] {
        &self.legs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Sorted, de-duplicated ids of every account the legs touch.
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.legs.iter().map(|l| l.account_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Sums signed leg amounts per currency and requires every sum to be exactly zero.
pub fn ensure_balanced(legs: &[TransferLeg]) -> Result<()> {
    let mut totals: BTreeMap<&Currency, Decimal> = BTreeMap::new();
    for leg in legs {
        let total = totals.entry(leg.amount.currency()).or_insert(Decimal::ZERO);
        *total = total
            .checked_add(leg.amount.amount())
            .ok_or_else(|| LedgerError::InvalidAmount(leg.amount.amount().to_string()))?;
    }
    match totals.into_iter().find(|(_, total)| !total.is_zero()) {
        Some((currency, total)) => Err(LedgerError::Unbalanced {
            currency: currency.clone(),
            total,
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct TransferRequestBuilder {
    reference: Option<String>,
    transfer_type: Option<String>,
    legs: Vec<TransferLeg>,
    error: Option<LedgerError>,
}

impl TransferRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn transfer_type(mut self, transfer_type: impl Into<String>) -> Self {
        self.transfer_type = Some(transfer_type.into());
        self
    }

    /// Starts a leg against `account_id`; finish it with `debit`, `credit` or `amount`.
    pub fn account(self, account_id: impl Into<AccountId>) -> LegBuilder {
        LegBuilder {
            builder: self,
            account_id: account_id.into(),
        }
    }

    fn push_leg(mut self, account_id: AccountId, amount: Result<MoneyValue>) -> Self {
        match amount {
            Ok(amount) => self.legs.push(TransferLeg { account_id, amount }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn build(self) -> Result<TransferRequest> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let reference = required(self.reference, "reference")?;
        let transfer_type = required(self.transfer_type, "type")?;
        if self.legs.is_empty() {
            return Err(LedgerError::Validation(
                "transfer request must have at least one leg".to_string(),
            ));
        }
        ensure_balanced(&self.legs)?;

        Ok(TransferRequest {
            reference,
            transfer_type,
            legs: self.legs,
            created_at: Utc::now(),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LedgerError::Validation(format!("transfer request is missing a {field}"))),
    }
}

pub struct LegBuilder {
    builder: TransferRequestBuilder,
    account_id: AccountId,
}

impl LegBuilder {
    /// Appends the negated amount.
    pub fn debit(self, amount: &str, currency: &str) -> TransferRequestBuilder {
        let amount = MoneyValue::parse(amount, currency).map(|m| -m);
        self.builder.push_leg(self.account_id, amount)
    }

    /// Appends the amount as given.
    pub fn credit(self, amount: &str, currency: &str) -> TransferRequestBuilder {
        let amount = MoneyValue::parse(amount, currency);
        self.builder.push_leg(self.account_id, amount)
    }

    /// Appends a raw signed amount.
    pub fn amount(self, amount: MoneyValue) -> TransferRequestBuilder {
        self.builder.push_leg(self.account_id, Ok(amount))
    }
}
