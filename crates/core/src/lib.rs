pub mod account;
pub mod config;
pub mod error;
pub mod money;
pub mod persistence;
pub mod transaction;
pub mod transfer;

pub use account::{Account, AccountId, ChartOfAccounts, ChartOfAccountsBuilder};
pub use config::{ConnectionOptions, DriverKind};
pub use error::{LedgerError, Result};
pub use money::{Currency, MoneyValue};
pub use persistence::{PersistenceProvider, UnitOfWork};
pub use transaction::Transaction;
pub use transfer::{
    ensure_balanced, LegBuilder, TransferLeg, TransferRequest, TransferRequestBuilder,
};
