use crate::model::{Address, LedgerIndex, TxHash};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A validated transaction as returned by account history.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTx {
    pub hash: TxHash,
    pub account: Address,
    pub destination: Option<Address>,
    /// `None` for non-XRP amounts.
    pub amount: Option<Decimal>,
    pub destination_tag: Option<u32>,
    pub ledger_index: LedgerIndex,
    pub date: DateTime<Utc>,
    /// Hex encoded `MemoData` fields in ledger order.
    pub memos: Vec<String>,
}
impl LedgerTx {
    pub fn is_inbound(&self, account: &str) -> bool {
        self.destination.as_deref() == Some(account)
    }
    pub fn first_memo(&self) -> Option<&str> {
        self.memos.first().map(String::as_str)
    }
}
/// Result of a single transaction lookup. Fields other than `validated`
/// may be absent while the transaction is not yet in a closed ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TxStatus {
    pub validated: bool,
    pub amount: Option<Decimal>,
    pub ledger_index: Option<LedgerIndex>,
    pub date: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Ledger {
    async fn get_balance(&self, account: &str) -> Result<Decimal>;
    /// One forward page of the account history starting at `min_ledger`
    /// inclusive. `-1` means the earliest available ledger.
    async fn get_account_transactions(
        &self,
        account: &str,
        min_ledger: LedgerIndex,
        limit: u32,
    ) -> Result<Vec<LedgerTx>>;
    /// `None` if the ledger doesn't know the transaction (yet).
    async fn get_transaction(&self, hash: &str) -> Result<Option<TxStatus>>;
}

#[cfg(test)]
pub use self::test_ledger::*;

#[cfg(test)]
mod test_ledger {
    use super::*;
    use crate::model::ripple_time;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory ledger. Clones share the same history.
    #[derive(Debug, Default, Clone)]
    pub struct TestLedger {
        balance: Arc<Mutex<Decimal>>,
        transactions: Arc<Mutex<Vec<LedgerTx>>>,
        statuses: Arc<Mutex<HashMap<TxHash, TxStatus>>>,
    }
    impl TestLedger {
        pub fn new(balance: Decimal) -> Self {
            Self {
                balance: Arc::new(Mutex::new(balance)),
                ..Default::default()
            }
        }
        pub fn transactions(&self) -> Vec<LedgerTx> {
            self.transactions.lock().unwrap().clone()
        }
        pub fn last_ledger_index(&self) -> LedgerIndex {
            self.transactions
                .lock()
                .unwrap()
                .last()
                .map(|tx| tx.ledger_index)
                .unwrap_or_default()
        }
        pub fn push(&self, tx: LedgerTx) {
            self.transactions.lock().unwrap().push(tx);
        }
        pub fn set_status(&self, hash: &str, status: TxStatus) {
            self.statuses
                .lock()
                .unwrap()
                .insert(hash.to_string(), status);
        }
    }
    #[async_trait]
    impl Ledger for TestLedger {
        async fn get_balance(&self, _account: &str) -> Result<Decimal> {
            Ok(*self.balance.lock().unwrap())
        }
        async fn get_account_transactions(
            &self,
            account: &str,
            min_ledger: LedgerIndex,
            limit: u32,
        ) -> Result<Vec<LedgerTx>> {
            let txs = self.transactions.lock().unwrap();
            Ok(txs
                .iter()
                .filter(|tx| tx.account == account || tx.is_inbound(account))
                .filter(|tx| tx.ledger_index >= min_ledger)
                .take(limit as usize)
                .cloned()
                .collect())
        }
        async fn get_transaction(&self, hash: &str) -> Result<Option<TxStatus>> {
            if let Some(status) = self.statuses.lock().unwrap().get(hash) {
                return Ok(Some(status.clone()));
            }
            let txs = self.transactions.lock().unwrap();
            Ok(txs.iter().find(|tx| tx.hash == hash).map(|tx| TxStatus {
                validated: true,
                amount: tx.amount,
                ledger_index: Some(tx.ledger_index),
                date: Some(tx.date),
            }))
        }
    }

    pub fn payment(
        hash: &str,
        from: &str,
        to: &str,
        amount: Decimal,
        tag: Option<u32>,
        ledger_index: LedgerIndex,
    ) -> LedgerTx {
        LedgerTx {
            hash: hash.to_string(),
            account: from.to_string(),
            destination: Some(to.to_string()),
            amount: Some(amount),
            destination_tag: tag,
            ledger_index,
            date: ripple_time(ledger_index * 4).unwrap(),
            memos: vec![],
        }
    }
    pub fn with_memo(mut tx: LedgerTx, memo: &str) -> LedgerTx {
        tx.memos.push(hex::encode_upper(memo));
        tx
    }
}
