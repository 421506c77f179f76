use chrono::Utc;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use tally_core::{
    ensure_balanced, Account, AccountId, ChartOfAccounts, ConnectionOptions, LedgerError,
    MoneyValue, PersistenceProvider, Result, Transaction, TransferRequest, TransferRequestBuilder,
};
use uuid::Uuid;

/// Double-entry ledger over a fixed chart of accounts.
///
/// `commit` is the only operation that changes state. Cloning is cheap and
/// every clone shares the same store.
#[derive(Clone)]
pub struct Ledger {
    chart: Arc<ChartOfAccounts>,
    provider: Arc<dyn PersistenceProvider>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("accounts", &self.chart.len())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Opens a ledger on the in-process store, or on the durable store `options` names.
    pub async fn new(chart: ChartOfAccounts, options: Option<&ConnectionOptions>) -> Result<Self> {
        let provider = tally_storage::connect(options).await?;
        Self::with_provider(chart, provider).await
    }

    pub async fn in_memory(chart: ChartOfAccounts) -> Result<Self> {
        Self::new(chart, None).await
    }

    /// Seeds the chart's accounts into `provider` and binds to it.
    pub async fn with_provider(
        chart: ChartOfAccounts,
        provider: Arc<dyn PersistenceProvider>,
    ) -> Result<Self> {
        tally_storage::seed_accounts(provider.as_ref(), &chart).await?;
        tracing::info!(accounts = chart.len(), "ledger opened");
        Ok(Ledger {
            chart: Arc::new(chart),
            provider,
        })
    }

    pub fn chart(&self) -> &ChartOfAccounts {
        &self.chart
    }

    pub async fn account_balance(&self, account_id: &str) -> Result<MoneyValue> {
        let id = self.known_account(account_id)?;
        self.provider
            .balance(&id)
            .await?
            .ok_or(LedgerError::UnknownAccount(id))
    }

    /// Current state of every account, in chart order.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::with_capacity(self.chart.len());
        for account in self.chart.accounts() {
            let balance = self
                .provider
                .balance(&account.id)
                .await?
                .ok_or_else(|| LedgerError::UnknownAccount(account.id.clone()))?;
            accounts.push(Account::new(account.id.clone(), balance));
        }
        Ok(accounts)
    }

    /// Account existence is not checked until the request is committed.
    pub fn create_transfer_request(&self) -> TransferRequestBuilder {
        TransferRequestBuilder::new()
    }

    /// Applies every leg of `request` or none of them.
    ///
    /// Returns the recorded transactions, one per leg in leg order. Dropping the
    /// returned future before the store is reached cancels the commit; after that
    /// point it runs to completion or rolls back whole.
    pub async fn commit(&self, request: TransferRequest) -> Result<Vec<Transaction>> {
        let deltas = self.validate(&request)?;

        let transfer_id = Uuid::new_v4();
        let transactions = Transaction::from_request(&request, transfer_id, Utc::now());
        tracing::debug!(
            transfer_id = %transfer_id,
            reference = request.reference(),
            legs = request.legs().len(),
            "transfer validated"
        );

        let provider = Arc::clone(&self.provider);
        let records = transactions.clone();
        let handle = tokio::spawn(async move { apply(provider.as_ref(), deltas, &records).await });
        let applied = handle
            .await
            .map_err(LedgerError::infrastructure)
            .and_then(|r| r);

        match applied {
            Ok(()) => {
                tracing::info!(
                    transfer_id = %transfer_id,
                    reference = request.reference(),
                    transfer_type = request.transfer_type(),
                    legs = transactions.len(),
                    "transfer committed"
                );
                Ok(transactions)
            }
            Err(e) => {
                if e.is_infrastructure() {
                    tracing::error!(
                        transfer_id = %transfer_id,
                        reference = request.reference(),
                        "commit failed: {e}"
                    );
                } else {
                    tracing::warn!(
                        transfer_id = %transfer_id,
                        reference = request.reference(),
                        "commit rolled back: {e}"
                    );
                }
                Err(e)
            }
        }
    }

    pub async fn find_transactions(&self, account_id: &str) -> Result<Vec<Transaction>> {
        let id = self.known_account(account_id)?;
        self.provider.transactions(&id).await
    }

    /// Renders every recorded transaction as a fixed-width table, in commit order.
    pub async fn history_log(&self) -> Result<String> {
        let history = self.provider.history().await?;
        Ok(render_history(&history))
    }

    pub async fn write_history_log<W: Write>(&self, out: W) -> Result<()> {
        let log = self.history_log().await?;
        write_log(out, &log)
    }

    pub async fn print_history_log(&self) -> Result<()> {
        let log = self.history_log().await?;
        write_log(io::stdout().lock(), &log)
    }

    fn known_account(&self, account_id: &str) -> Result<AccountId> {
        let id = AccountId::new(account_id);
        if !self.chart.contains(&id) {
            return Err(LedgerError::UnknownAccount(id));
        }
        Ok(id)
    }

    /// Checks the request against the chart and nets the legs per account.
    fn validate(&self, request: &TransferRequest) -> Result<BTreeMap<AccountId, MoneyValue>> {
        let mut deltas: BTreeMap<AccountId, MoneyValue> = BTreeMap::new();
        for leg in request.legs() {
            let account = self
                .chart
                .get(&leg.account_id)
                .ok_or_else(|| LedgerError::UnknownAccount(leg.account_id.clone()))?;
            if account.currency() != leg.amount.currency() {
                return Err(LedgerError::CurrencyMismatch {
                    expected: account.currency().clone(),
                    found: leg.amount.currency().clone(),
                });
            }
            let delta = match deltas.remove(&leg.account_id) {
                Some(sum) => sum.checked_add(&leg.amount)?,
                None => leg.amount.clone(),
            };
            deltas.insert(leg.account_id.clone(), delta);
        }
        ensure_balanced(request.legs())?;
        Ok(deltas)
    }
}

async fn apply(
    provider: &dyn PersistenceProvider,
    deltas: BTreeMap<AccountId, MoneyValue>,
    transactions: &[Transaction],
) -> Result<()> {
    let account_ids: Vec<AccountId> = deltas.keys().cloned().collect();
    let mut uow = provider.begin(&account_ids).await?;

    let staged = async {
        for (account_id, delta) in &deltas {
            let balance = uow
                .balance(account_id)
                .await?
                .ok_or_else(|| LedgerError::UnknownAccount(account_id.clone()))?;
            let updated = balance.checked_add(delta)?;
            tracing::debug!(
                account = %account_id,
                from = %balance,
                to = %updated,
                "applying leg"
            );
            uow.write_balance(account_id, &updated).await?;
        }
        for transaction in transactions {
            uow.append_transaction(transaction).await?;
        }
        Ok::<(), LedgerError>(())
    }
    .await;

    match staged {
        Ok(()) => uow.commit().await,
        Err(e) => {
            if let Err(rollback) = uow.rollback().await {
                tracing::error!("rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

fn write_log<W: Write>(mut out: W, log: &str) -> Result<()> {
    out.write_all(log.as_bytes()).map_err(LedgerError::infrastructure)?;
    out.flush().map_err(LedgerError::infrastructure)
}

fn render_history(history: &[Transaction]) -> String {
    let mut out = format!(
        "{:<36}  {:<24}  {:<16}  {:<12}  {:<12}  {:>16}  {:<3}\n",
        "transfer_id", "committed_at", "account", "reference", "type", "amount", "ccy"
    );
    for t in history {
        out.push_str(&format!(
            "{:<36}  {:<24}  {:<16}  {:<12}  {:<12}  {:>16}  {:<3}\n",
            t.transfer_id,
            t.committed_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            t.account_id,
            t.reference,
            t.transfer_type,
            t.amount.amount(),
            t.amount.currency(),
        ));
    }
    out
}
