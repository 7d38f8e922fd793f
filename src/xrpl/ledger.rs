use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use super::client::XrplClient;
use crate::ledger::{Ledger, LedgerTx, TxStatus};
use crate::model::{drops_to_xrp, LedgerIndex};

pub struct XrplLedger {
    client: XrplClient,
}
impl XrplLedger {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: XrplClient::new(url, timeout)?,
        })
    }
}
#[async_trait]
impl Ledger for XrplLedger {
    async fn get_balance(&self, account: &str) -> Result<Decimal> {
        drops_to_xrp(&self.client.account_balance(account).await?)
    }
    async fn get_account_transactions(
        &self,
        account: &str,
        min_ledger: LedgerIndex,
        limit: u32,
    ) -> Result<Vec<LedgerTx>> {
        self.client
            .account_tx(account, min_ledger, limit)
            .await?
            .into_iter()
            .map(LedgerTx::try_from)
            .collect()
    }
    async fn get_transaction(&self, hash: &str) -> Result<Option<TxStatus>> {
        self.client
            .tx(hash)
            .await?
            .map(TxStatus::try_from)
            .transpose()
    }
}
