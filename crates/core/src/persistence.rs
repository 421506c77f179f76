//! Storage contract the ledger engine is written against.
//!
//! Backends only ever report [`LedgerError::Infrastructure`](crate::LedgerError::Infrastructure);
//! every domain rule is enforced by the engine before a unit of work starts.

use async_trait::async_trait;

use super::account::{Account, AccountId};
use super::error::Result;
use super::money::MoneyValue;
use super::transaction::Transaction;

#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Inserts accounts that are not stored yet. Existing rows keep their balance.
    async fn open_accounts(&self, accounts: &[Account]) -> Result<()>;

    async fn balance(&self, account_id: &AccountId) -> Result<Option<MoneyValue>>;

    /// History of one account in commit order.
    async fn transactions(&self, account_id: &AccountId) -> Result<Vec<Transaction>>;

    /// History of every account in commit order.
    async fn history(&self) -> Result<Vec<Transaction>>;

    /// Starts an atomic unit of work with exclusive access to `account_ids`.
    ///
    /// Units of work over intersecting account sets never overlap; disjoint ones may.
    async fn begin(&self, account_ids: &[AccountId]) -> Result<Box<dyn UnitOfWork>>;
}

/// Writes staged inside a unit of work become visible together on `commit`, or
/// not at all. Dropping without committing is a rollback.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn balance(&mut self, account_id: &AccountId) -> Result<Option<MoneyValue>>;

    async fn write_balance(&mut self, account_id: &AccountId, balance: &MoneyValue) -> Result<()>;

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
