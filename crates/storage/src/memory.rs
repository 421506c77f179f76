use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tally_core::{
    Account, AccountId, LedgerError, MoneyValue, PersistenceProvider, Result, Transaction,
    UnitOfWork,
};
use tokio::sync::{Mutex as AccountLock, OwnedMutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    balances: HashMap<AccountId, MoneyValue>,
    history: Vec<Transaction>,
}

/// Volatile single-process backend.
///
/// Each account has its own async lock; a unit of work holds the locks of the
/// accounts it touches until it commits or is dropped. Committed writes are
/// published under one write lock, so readers see either all of them or none.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Arc<RwLock<MemoryState>>,
    locks: Mutex<HashMap<AccountId, Arc<AccountLock<()>>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_locks(&self, account_ids: &[AccountId]) -> Result<Vec<Arc<AccountLock<()>>>> {
        let mut ids = account_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut locks = self.locks.lock().map_err(LedgerError::infrastructure)?;
        Ok(ids
            .into_iter()
            .map(|id| locks.entry(id).or_default().clone())
            .collect())
    }
}

#[async_trait]
impl PersistenceProvider for MemoryProvider {
    async fn open_accounts(&self, accounts: &[Account]) -> Result<()> {
        let mut state = self.state.write().map_err(LedgerError::infrastructure)?;
        for account in accounts {
            state
                .balances
                .entry(account.id.clone())
                .or_insert_with(|| account.balance.clone());
        }
        Ok(())
    }

    async fn balance(&self, account_id: &AccountId) -> Result<Option<MoneyValue>> {
        let state = self.state.read().map_err(LedgerError::infrastructure)?;
        Ok(state.balances.get(account_id).cloned())
    }

    async fn transactions(&self, account_id: &AccountId) -> Result<Vec<Transaction>> {
        let state = self.state.read().map_err(LedgerError::infrastructure)?;
        Ok(state
            .history
            .iter()
            .filter(|t| &t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn history(&self) -> Result<Vec<Transaction>> {
        let state = self.state.read().map_err(LedgerError::infrastructure)?;
        Ok(state.history.clone())
    }

    async fn begin(&self, account_ids: &[AccountId]) -> Result<Box<dyn UnitOfWork>> {
        // Sorted acquisition keeps overlapping units of work from deadlocking.
        let mut guards = Vec::new();
        for lock in self.account_locks(account_ids)? {
            guards.push(lock.lock_owned().await);
        }
        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            _guards: guards,
            balances: HashMap::new(),
            appended: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork {
    state: Arc<RwLock<MemoryState>>,
    _guards: Vec<OwnedMutexGuard<()>>,
    balances: HashMap<AccountId, MoneyValue>,
    appended: Vec<Transaction>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn balance(&mut self, account_id: &AccountId) -> Result<Option<MoneyValue>> {
        if let Some(staged) = self.balances.get(account_id) {
            return Ok(Some(staged.clone()));
        }
        let state = self.state.read().map_err(LedgerError::infrastructure)?;
        Ok(state.balances.get(account_id).cloned())
    }

    async fn write_balance(&mut self, account_id: &AccountId, balance: &MoneyValue) -> Result<()> {
        self.balances.insert(account_id.clone(), balance.clone());
        Ok(())
    }

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.appended.push(transaction.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.write().map_err(LedgerError::infrastructure)?;
        state.balances.extend(this.balances);
        state.history.extend(this.appended);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn eur(amount: &str) -> MoneyValue {
        MoneyValue::parse(amount, "EUR").unwrap()
    }

    fn id(s: &str) -> AccountId {
        AccountId::new(s)
    }

    fn tx(account: &str, amount: &str) -> Transaction {
        Transaction {
            account_id: id(account),
            amount: eur(amount),
            reference: "T1".to_string(),
            transfer_type: "test".to_string(),
            transfer_id: Uuid::new_v4(),
            committed_at: Utc::now(),
        }
    }

    async fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider
            .open_accounts(&[
                Account::new("cash", eur("100.00")),
                Account::new("revenue", eur("0.00")),
                Account::new("fees", eur("0.00")),
            ])
            .await
            .unwrap();
        provider
    }

    #[tokio::test]
    async fn open_accounts_is_idempotent() {
        let provider = provider().await;
        let mut uow = provider.begin(&[id("cash")]).await.unwrap();
        uow.write_balance(&id("cash"), &eur("90.00")).await.unwrap();
        uow.commit().await.unwrap();

        provider
            .open_accounts(&[Account::new("cash", eur("100.00"))])
            .await
            .unwrap();
        assert_eq!(
            provider.balance(&id("cash")).await.unwrap(),
            Some(eur("90.00"))
        );
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let provider = provider().await;
        let mut uow = provider.begin(&[id("cash"), id("revenue")]).await.unwrap();
        uow.write_balance(&id("cash"), &eur("95.00")).await.unwrap();
        uow.append_transaction(&tx("cash", "-5.00")).await.unwrap();

        assert_eq!(uow.balance(&id("cash")).await.unwrap(), Some(eur("95.00")));
        assert_eq!(
            provider.balance(&id("cash")).await.unwrap(),
            Some(eur("100.00"))
        );
        assert!(provider.history().await.unwrap().is_empty());

        uow.commit().await.unwrap();
        assert_eq!(
            provider.balance(&id("cash")).await.unwrap(),
            Some(eur("95.00"))
        );
        assert_eq!(provider.transactions(&id("cash")).await.unwrap().len(), 1);
        let revenue = provider.transactions(&id("revenue")).await.unwrap();
        assert!(revenue.is_empty());
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_everything() {
        let provider = provider().await;

        let mut uow = provider.begin(&[id("cash")]).await.unwrap();
        uow.write_balance(&id("cash"), &eur("1.00")).await.unwrap();
        uow.rollback().await.unwrap();

        let mut uow = provider.begin(&[id("cash")]).await.unwrap();
        uow.append_transaction(&tx("cash", "1.00")).await.unwrap();
        drop(uow);

        assert_eq!(
            provider.balance(&id("cash")).await.unwrap(),
            Some(eur("100.00"))
        );
        assert!(provider.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_account_has_no_balance() {
        let provider = provider().await;
        assert_eq!(provider.balance(&id("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn disjoint_units_of_work_do_not_block() {
        let provider = provider().await;
        let _held = provider.begin(&[id("cash"), id("revenue")]).await.unwrap();

        let other =
            tokio::time::timeout(Duration::from_secs(1), provider.begin(&[id("fees")])).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn overlapping_units_of_work_wait() {
        let provider = provider().await;
        let held = provider.begin(&[id("cash"), id("revenue")]).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            provider.begin(&[id("revenue"), id("fees")]),
        )
        .await;
        assert!(blocked.is_err());

        drop(held);
        let resumed =
            tokio::time::timeout(Duration::from_secs(1), provider.begin(&[id("revenue")])).await;
        assert!(resumed.is_ok());
    }
}
