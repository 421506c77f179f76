pub mod ledger;

pub use ledger::Ledger;
pub use tally_core::{
    Account, AccountId, ChartOfAccounts, ChartOfAccountsBuilder, ConnectionOptions, Currency,
    DriverKind, LedgerError, MoneyValue, PersistenceProvider, Result, Transaction, TransferLeg,
    TransferRequest, TransferRequestBuilder, UnitOfWork,
};
