use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::error::{LedgerError, Result};
use super::money::{Currency, MoneyValue};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId(id)
    }
}

impl From<&AccountId> for AccountId {
    fn from(id: &AccountId) -> Self {
        id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: MoneyValue,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, balance: MoneyValue) -> Self {
        Account {
            id: id.into(),
            balance,
        }
    }

    pub fn currency(&self) -> &Currency {
        self.balance.currency()
    }
}

/// The fixed, non-empty set of accounts a ledger is opened with, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOfAccounts {
    accounts: Vec<Account>,
    index: HashMap<AccountId, usize>,
}

impl ChartOfAccounts {
    pub fn builder() -> ChartOfAccountsBuilder {
        ChartOfAccountsBuilder::default()
    }

    pub fn get(&self, id: &AccountId) -> Option<&Account> {
        self.index.get(id).map(|&i| &self.accounts[i])
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.index.contains_key(id)
    }

    /// Opening state of every account, in the order they were registered.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Accumulates accounts; the first bad entry is reported by [`ChartOfAccountsBuilder::build`].
#[derive(Debug, Default)]
pub struct ChartOfAccountsBuilder {
    accounts: Vec<Account>,
    index: HashMap<AccountId, usize>,
    error: Option<LedgerError>,
}

impl ChartOfAccountsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(
        mut self,
        id: impl Into<AccountId>,
        opening_balance: &str,
        currency: &str,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let id = id.into();
        match MoneyValue::parse(opening_balance, currency) {
            Ok(balance) => self.push(id, balance),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn account_with_balance(
        mut self,
        id: impl Into<AccountId>,
        opening_balance: MoneyValue,
    ) -> Self {
        if self.error.is_none() {
            self.push(id.into(), opening_balance);
        }
        self
    }

    fn push(&mut self, id: AccountId, balance: MoneyValue) {
        if self.index.contains_key(&id) {
            self.error = Some(LedgerError::DuplicateAccount(id));
            return;
        }
        self.index.insert(id.clone(), self.accounts.len());
        self.accounts.push(Account::new(id, balance));
    }

    pub fn build(self) -> Result<ChartOfAccounts> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.accounts.is_empty() {
            return Err(LedgerError::Configuration(
                "chart of accounts must contain at least one account".to_string(),
            ));
        }
        Ok(ChartOfAccounts {
            accounts: self.accounts,
            index: self.index,
        })
    }
}
