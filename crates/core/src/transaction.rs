use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::money::MoneyValue;
use super::transfer::TransferRequest;

/// A posted leg. Created once per leg by a successful commit and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub account_id: AccountId,
    pub amount: MoneyValue,
    pub reference: String,
    pub transfer_type: String,
    pub transfer_id: Uuid,
    pub committed_at: DateTime<Utc>,
}

impl Transaction {
    /// One record per leg, in leg order, all stamped with the same transfer id and time.
    pub fn from_request(
        request: &TransferRequest,
        transfer_id: Uuid,
        committed_at: DateTime<Utc>,
    ) -> Vec<Transaction> {
        request
            .legs()
            .iter()
            .map(|leg| Transaction {
                account_id: leg.account_id.clone(),
                amount: leg.amount.clone(),
                reference: request.reference().to_string(),
                transfer_type: request.transfer_type().to_string(),
                transfer_id,
                committed_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferRequestBuilder;

    #[test]
    fn one_record_per_leg_sharing_transfer_identity() {
        let request = TransferRequestBuilder::new()
            .reference("T9")
            .transfer_type("payout")
            .account("cash")
            .debit("3.00", "EUR")
            .account("fees")
            .credit("1.00", "EUR")
            .account("payable")
            .credit("2.00", "EUR")
            .build()
            .unwrap();
        let id = Uuid::new_v4();
        let at = Utc::now();

        let txs = Transaction::from_request(&request, id, at);

        assert_eq!(txs.len(), 3);
        for t in &txs {
            assert_eq!(t.transfer_id, id);
            assert_eq!(t.committed_at, at);
            assert_eq!(t.reference, "T9");
            assert_eq!(t.transfer_type, "payout");
        }
        assert_eq!(txs[2].account_id.as_str(), "payable");
        assert_eq!(txs[0].amount, MoneyValue::parse("-3", "EUR").unwrap());
    }
}
