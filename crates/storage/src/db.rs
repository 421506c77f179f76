use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tally_core::{
    Account, AccountId, ConnectionOptions, Currency, DriverKind, LedgerError, MoneyValue,
    PersistenceProvider, Result, Transaction, UnitOfWork,
};
use uuid::Uuid;

pub type DbPool = Pool<Sqlite>;

type TransactionRow = (String, String, String, String, String, String, DateTime<Utc>);

/// Takes the write lock up front. A deferred `BEGIN` that reads and then writes
/// fails with `SQLITE_BUSY` instead of waiting on `busy_timeout`.
const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

/// Durable backend on SQLite. Every unit of work is one database transaction.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    pool: DbPool,
}

impl SqliteProvider {
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        let pool = create_db(options).await.map_err(|e| {
            tracing::error!(
                driver = %options.driver,
                endpoint = %options.endpoint,
                "failed to open ledger store: {e}"
            );
            LedgerError::infrastructure(e)
        })?;
        Ok(SqliteProvider { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub async fn create_db(options: &ConnectionOptions) -> std::result::Result<DbPool, sqlx::Error> {
    let connect = match options.driver {
        DriverKind::EmbeddedFile => SqliteConnectOptions::new()
            .filename(&options.endpoint)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal),
        DriverKind::InMemory => SqliteConnectOptions::from_str("sqlite::memory:")?,
        DriverKind::Postgres => {
            return Err(sqlx::Error::Configuration(
                format!("driver {} is not supported by this build", options.driver).into(),
            ))
        }
    };
    let connect = connect
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(options.busy_timeout_ms));

    // A `:memory:` database lives and dies with its connection, so it must stay at one.
    let max_connections = match options.driver {
        DriverKind::InMemory => 1,
        _ => options.max_connections.max(1),
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_millis(options.acquire_timeout_ms))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            currency TEXT NOT NULL,
            balance TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL,
            reference TEXT NOT NULL,
            type TEXT NOT NULL,
            transfer_id TEXT NOT NULL,
            committed_at TEXT NOT NULL,
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn infra(e: sqlx::Error) -> LedgerError {
    LedgerError::infrastructure(e)
}

fn decode_money(amount: &str, currency: &str) -> Result<MoneyValue> {
    let amount = Decimal::from_str_exact(amount)
        .map_err(|e| LedgerError::Infrastructure(format!("corrupt amount '{amount}': {e}")))?;
    let currency = Currency::new(currency)
        .map_err(|e| LedgerError::Infrastructure(format!("corrupt currency: {e}")))?;
    Ok(MoneyValue::new(amount, currency))
}

fn decode_transaction(row: TransactionRow) -> Result<Transaction> {
    let (account_id, amount, currency, reference, transfer_type, transfer_id, committed_at) = row;
    let transfer_id = Uuid::parse_str(&transfer_id).map_err(|e| {
        LedgerError::Infrastructure(format!("corrupt transfer id '{transfer_id}': {e}"))
    })?;
    Ok(Transaction {
        account_id: AccountId::new(account_id),
        amount: decode_money(&amount, &currency)?,
        reference,
        transfer_type,
        transfer_id,
        committed_at,
    })
}

const SELECT_TRANSACTIONS: &str = "SELECT account_id, amount, currency, reference, type, \
     transfer_id, committed_at FROM transactions";

const SELECT_BALANCE: &str = "SELECT balance, currency FROM accounts WHERE id = ?";

#[async_trait]
impl PersistenceProvider for SqliteProvider {
    async fn open_accounts(&self, accounts: &[Account]) -> Result<()> {
        let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await.map_err(infra)?;
        for account in accounts {
            sqlx::query("INSERT OR IGNORE INTO accounts (id, currency, balance) VALUES (?, ?, ?)")
                .bind(account.id.as_str())
                .bind(account.currency().code())
                .bind(account.balance.amount().to_string())
                .execute(&mut *tx)
                .await
                .map_err(infra)?;
        }
        tx.commit().await.map_err(infra)
    }

    async fn balance(&self, account_id: &AccountId) -> Result<Option<MoneyValue>> {
        let row = sqlx::query_as::<_, (String, String)>(SELECT_BALANCE)
            .bind(account_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(infra)?;
        row.map(|(balance, currency)| decode_money(&balance, &currency))
            .transpose()
    }

    async fn transactions(&self, account_id: &AccountId) -> Result<Vec<Transaction>> {
        let sql = format!("{SELECT_TRANSACTIONS} WHERE account_id = ? ORDER BY id");
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(account_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        rows.into_iter().map(decode_transaction).collect()
    }

    async fn history(&self) -> Result<Vec<Transaction>> {
        let sql = format!("{SELECT_TRANSACTIONS} ORDER BY id");
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        rows.into_iter().map(decode_transaction).collect()
    }

    async fn begin(&self, _account_ids: &[AccountId]) -> Result<Box<dyn UnitOfWork>> {
        // SQLite has a single writer per file; concurrent units of work queue on
        // `busy_timeout` and only time out into an infrastructure error.
        let tx = self.pool.begin_with(BEGIN_IMMEDIATE).await.map_err(infra)?;
        Ok(Box::new(SqliteUnitOfWork { tx }))
    }
}

struct SqliteUnitOfWork {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn balance(&mut self, account_id: &AccountId) -> Result<Option<MoneyValue>> {
        let row = sqlx::query_as::<_, (String, String)>(SELECT_BALANCE)
            .bind(account_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(infra)?;
        row.map(|(balance, currency)| decode_money(&balance, &currency))
            .transpose()
    }

    async fn write_balance(&mut self, account_id: &AccountId, balance: &MoneyValue) -> Result<()> {
        let updated = sqlx::query("UPDATE accounts SET balance = ? WHERE id = ? AND currency = ?")
            .bind(balance.amount().to_string())
            .bind(account_id.as_str())
            .bind(balance.currency().code())
            .execute(&mut *self.tx)
            .await
            .map_err(infra)?;
        if updated.rows_affected() != 1 {
            return Err(LedgerError::Infrastructure(format!(
                "balance row for {account_id} in {} not found",
                balance.currency()
            )));
        }
        Ok(())
    }

    async fn append_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (account_id, amount, currency, reference, type, transfer_id, committed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(transaction.account_id.as_str())
        .bind(transaction.amount.amount().to_string())
        .bind(transaction.amount.currency().code())
        .bind(&transaction.reference)
        .bind(&transaction.transfer_type)
        .bind(transaction.transfer_id.to_string())
        .bind(transaction.committed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(infra)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(infra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(amount: &str) -> MoneyValue {
        MoneyValue::parse(amount, "EUR").unwrap()
    }

    fn record(account: &str, amount: &str, transfer_id: Uuid) -> Transaction {
        Transaction {
            account_id: AccountId::new(account),
            amount: eur(amount),
            reference: "T1".to_string(),
            transfer_type: "testing".to_string(),
            transfer_id,
            committed_at: Utc::now(),
        }
    }

    async fn seeded(options: &ConnectionOptions) -> SqliteProvider {
        let provider = SqliteProvider::connect(options).await.unwrap();
        provider
            .open_accounts(&[
                Account::new("cash", eur("1000.00")),
                Account::new("revenue", eur("0.00")),
            ])
            .await
            .unwrap();
        provider
    }

    #[tokio::test]
    async fn balances_round_trip_exactly() {
        let provider = seeded(&ConnectionOptions::in_memory()).await;
        let balance = provider.balance(&"cash".into()).await.unwrap().unwrap();
        assert_eq!(balance, eur("1000.00"));
        assert_eq!(balance.amount().to_string(), "1000.00");
        assert_eq!(provider.balance(&"missing".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn committed_unit_of_work_is_visible() {
        let provider = seeded(&ConnectionOptions::in_memory()).await;
        let transfer_id = Uuid::new_v4();

        let mut uow = provider
            .begin(&["cash".into(), "revenue".into()])
            .await
            .unwrap();
        uow.write_balance(&"cash".into(), &eur("995.00"))
            .await
            .unwrap();
        uow.write_balance(&"revenue".into(), &eur("5.00"))
            .await
            .unwrap();
        uow.append_transaction(&record("cash", "-5.00", transfer_id))
            .await
            .unwrap();
        uow.append_transaction(&record("revenue", "5.00", transfer_id))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(
            provider.balance(&"revenue".into()).await.unwrap(),
            Some(eur("5.00"))
        );
        let cash = provider.transactions(&"cash".into()).await.unwrap();
        assert_eq!(cash.len(), 1);
        assert_eq!(cash[0].transfer_id, transfer_id);
        assert_eq!(cash[0].amount, eur("-5.00"));
        assert_eq!(provider.history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rolled_back_unit_of_work_leaves_no_trace() {
        let provider = seeded(&ConnectionOptions::in_memory()).await;

        let mut uow = provider.begin(&["cash".into()]).await.unwrap();
        uow.write_balance(&"cash".into(), &eur("1.00"))
            .await
            .unwrap();
        uow.append_transaction(&record("cash", "-999.00", Uuid::new_v4()))
            .await
            .unwrap();
        uow.rollback().await.unwrap();

        assert_eq!(
            provider.balance(&"cash".into()).await.unwrap(),
            Some(eur("1000.00"))
        );
        assert!(provider.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_to_wrong_currency_is_refused() {
        let provider = seeded(&ConnectionOptions::in_memory()).await;
        let mut uow = provider.begin(&["cash".into()]).await.unwrap();
        let sek = MoneyValue::parse("1.00", "SEK").unwrap();
        let err = uow.write_balance(&"cash".into(), &sek).await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let options = ConnectionOptions::embedded_file(dir.path().join("ledger.db"));

        {
            let provider = seeded(&options).await;
            let mut uow = provider.begin(&["cash".into()]).await.unwrap();
            uow.write_balance(&"cash".into(), &eur("984.50"))
                .await
                .unwrap();
            uow.commit().await.unwrap();
            provider.pool().close().await;
        }

        // Seeding again must not reset the stored balance.
        let provider = seeded(&options).await;
        assert_eq!(
            provider.balance(&"cash".into()).await.unwrap(),
            Some(eur("984.50"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_writer_waits_for_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ConnectionOptions::embedded_file(dir.path().join("ledger.db"));
        options.max_connections = 2;
        let provider = seeded(&options).await;

        let mut first = provider.begin(&["cash".into()]).await.unwrap();
        first.balance(&"cash".into()).await.unwrap();

        let waiting = {
            let provider = provider.clone();
            tokio::spawn(async move {
                let mut second = provider.begin(&["revenue".into()]).await?;
                second.balance(&"revenue".into()).await?;
                second
                    .write_balance(&"revenue".into(), &eur("1.00"))
                    .await?;
                second.commit().await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        first
            .write_balance(&"cash".into(), &eur("999.00"))
            .await
            .unwrap();
        first.commit().await.unwrap();

        waiting.await.unwrap().unwrap();
        assert_eq!(
            provider.balance(&"cash".into()).await.unwrap(),
            Some(eur("999.00"))
        );
        assert_eq!(
            provider.balance(&"revenue".into()).await.unwrap(),
            Some(eur("1.00"))
        );
    }

    #[test]
    fn corrupt_stored_amount_is_an_infrastructure_error() {
        let err = decode_money("0.00000000000000000000000000001", "EUR").unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn unsupported_driver_is_an_infrastructure_error() {
        let options = ConnectionOptions::new(DriverKind::Postgres, "localhost:5432", "sa", "");
        let err = SqliteProvider::connect(&options).await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn unreachable_file_is_an_infrastructure_error() {
        let dir = tempfile::tempdir().unwrap();
        let options =
            ConnectionOptions::embedded_file(dir.path().join("missing").join("ledger.db"));
        let err = SqliteProvider::connect(&options).await.unwrap_err();
        assert!(err.is_infrastructure());
    }
}
