pub mod db;
pub mod memory;

use std::sync::Arc;
use tally_core::{ChartOfAccounts, ConnectionOptions, PersistenceProvider, Result};

pub use db::{create_db, DbPool, SqliteProvider};
pub use memory::MemoryProvider;

/// Picks a backend: the in-process store when no options are given, otherwise
/// the durable store the options describe.
pub async fn connect(
    options: Option<&ConnectionOptions>,
) -> Result<Arc<dyn PersistenceProvider>> {
    match options {
        None => Ok(Arc::new(MemoryProvider::new())),
        Some(options) => {
            tracing::debug!(
                driver = %options.driver,
                endpoint = %options.endpoint,
                "connecting ledger store"
            );
            Ok(Arc::new(SqliteProvider::connect(options).await?))
        }
    }
}

/// Stores every account of the chart with its opening balance. Safe to run more
/// than once: accounts that already exist are left as they are.
pub async fn seed_accounts(
    provider: &dyn PersistenceProvider,
    chart: &ChartOfAccounts,
) -> Result<()> {
    provider.open_accounts(chart.accounts()).await?;
    tracing::debug!(accounts = chart.len(), "seeded chart of accounts");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{AccountId, DriverKind, MoneyValue};

    fn chart() -> ChartOfAccounts {
        ChartOfAccounts::builder()
            .account("cash", "1000.00", "EUR")
            .account("revenue", "0.00", "EUR")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn seeding_twice_is_harmless() {
        let provider = connect(None).await.unwrap();
        seed_accounts(provider.as_ref(), &chart()).await.unwrap();
        seed_accounts(provider.as_ref(), &chart()).await.unwrap();
        assert_eq!(
            provider.balance(&AccountId::new("cash")).await.unwrap(),
            Some(MoneyValue::parse("1000.00", "EUR").unwrap())
        );
    }

    #[tokio::test]
    async fn options_select_the_sql_backend() {
        let provider = connect(Some(&ConnectionOptions::in_memory())).await.unwrap();
        seed_accounts(provider.as_ref(), &chart()).await.unwrap();
        let revenue = provider.balance(&AccountId::new("revenue")).await.unwrap();
        assert!(revenue.is_some());
    }

    #[tokio::test]
    async fn unsupported_backend_fails_to_connect() {
        let options = ConnectionOptions::new(DriverKind::Postgres, "localhost", "", "");
        let err = connect(Some(&options)).await.err().unwrap();
        assert!(err.is_infrastructure());
    }
}
