use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::trace;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::LottoError;
use crate::ledger::{LedgerTx, TxStatus};
use crate::model::{drops_to_xrp, ripple_time, LedgerIndex};

/// rippled JSON-RPC client.
#[derive(Debug, Clone)]
pub struct XrplClient {
    client: Client,
    pub url: String,
}

#[derive(Debug)]
pub enum RpcResult<T> {
    Success(T),
    Error { error: String, message: String },
}

impl XrplClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("couldn't build http client")?;
        Ok(Self { client, url })
    }
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: impl Serialize,
    ) -> Result<RpcResult<T>> {
        trace!("Calling {} on {}", method, self.url);
        let request = RpcRequest {
            method,
            params: [params],
        };
        let response = self
            .client
            .post(self.url.as_str())
            .json(&request)
            .send()
            .await
            .map_err(LottoError::from)?;
        if response.status() != StatusCode::OK {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LottoError::LedgerUnavailable(format!("{}: {}", status, text)).into());
        }
        let response = response
            .json::<RpcResponse>()
            .await
            .map_err(LottoError::from)?;
        let result = response.result;
        if result.get("status").and_then(Value::as_str) == Some("success") {
            let parsed = serde_json::from_value(result)
                .with_context(|| format!("unexpected {} response", method))?;
            return Ok(RpcResult::Success(parsed));
        }
        let error = result
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = result
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(RpcResult::Error { error, message })
    }
    pub async fn account_balance(&self, account: &str) -> Result<String> {
        let params = json!({ "account": account, "ledger_index": "validated" });
        match self.call::<AccountInfo>("account_info", params).await? {
            RpcResult::Success(info) => Ok(info.account_data.balance),
            RpcResult::Error { error, message } => Err(LottoError::LedgerUnavailable(format!(
                "account_info for {} failed: {} {}",
                account, error, message
            ))
            .into()),
        }
    }
    pub async fn account_tx(
        &self,
        account: &str,
        min_ledger: LedgerIndex,
        limit: u32,
    ) -> Result<Vec<AccountTxEntry>> {
        let params = json!({
            "account": account,
            "ledger_index_min": min_ledger,
            "ledger_index_max": -1,
            "binary": false,
            "limit": limit,
            "forward": true,
        });
        match self.call::<AccountTx>("account_tx", params).await? {
            RpcResult::Success(page) => Ok(page.transactions),
            RpcResult::Error { error, message } => Err(LottoError::LedgerUnavailable(format!(
                "account_tx for {} failed: {} {}",
                account, error, message
            ))
            .into()),
        }
    }
    pub async fn tx(&self, hash: &str) -> Result<Option<RawTxResult>> {
        let params = json!({ "transaction": hash, "binary": false });
        match self.call::<RawTxResult>("tx", params).await? {
            RpcResult::Success(tx) => Ok(Some(tx)),
            RpcResult::Error { error, .. } if error == "txnNotFound" => Ok(None),
            RpcResult::Error { error, message } => Err(LottoError::LedgerUnavailable(format!(
                "tx {} failed: {} {}",
                hash, error, message
            ))
            .into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct RpcRequest<P: Serialize> {
    method: &'static str,
    params: [P; 1],
}
#[derive(Debug, Clone, Deserialize)]
struct RpcResponse {
    result: Value,
}
#[derive(Debug, Clone, Deserialize)]
struct AccountInfo {
    account_data: AccountData,
}
#[derive(Debug, Clone, Deserialize)]
struct AccountData {
    #[serde(rename = "Balance")]
    balance: String,
}
#[derive(Debug, Clone, Deserialize)]
struct AccountTx {
    transactions: Vec<AccountTxEntry>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct AccountTxEntry {
    tx: RawTx,
    #[serde(default)]
    meta: Option<RawMeta>,
}
/// Transaction metadata, only present once the ledger applied the tx.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeta {
    #[serde(default)]
    delivered_amount: Option<RawAmount>,
}
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Drops(String),
    Issued {},
}
#[derive(Debug, Clone, Deserialize)]
pub struct RawMemo {
    #[serde(rename = "Memo")]
    memo: RawMemoFields,
}
#[derive(Debug, Clone, Deserialize)]
struct RawMemoFields {
    #[serde(rename = "MemoData", default)]
    memo_data: Option<String>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct RawTx {
    pub hash: String,
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Destination", default)]
    pub destination: Option<String>,
    #[serde(rename = "Amount", default)]
    pub amount: Option<RawAmount>,
    #[serde(rename = "DestinationTag", default)]
    pub destination_tag: Option<u32>,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(default)]
    pub ledger_index: Option<LedgerIndex>,
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(rename = "Memos", default)]
    pub memos: Vec<RawMemo>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct RawTxResult {
    #[serde(flatten)]
    pub tx: RawTx,
    #[serde(default)]
    pub meta: Option<RawMeta>,
    #[serde(default)]
    pub validated: bool,
}

/// `Amount` of a partial payment is only an upper bound.
const PARTIAL_PAYMENT: u32 = 0x0002_0000;
/// rippled's `delivered_amount` for transactions older than the field.
const UNAVAILABLE: &str = "unavailable";

impl RawTx {
    /// XRP that actually arrived. `None` for issued currencies and for
    /// partial payments whose delivered amount isn't known.
    fn xrp_amount(&self, meta: Option<&RawMeta>) -> Result<Option<Decimal>> {
        let partial = self.flags & PARTIAL_PAYMENT != 0;
        let amount = match meta.and_then(|meta| meta.delivered_amount.as_ref()) {
            Some(RawAmount::Drops(drops)) if drops == UNAVAILABLE => {
                if partial {
                    None
                } else {
                    self.amount.as_ref()
                }
            }
            Some(delivered) => Some(delivered),
            None if partial => None,
            None => self.amount.as_ref(),
        };
        match amount {
            Some(RawAmount::Drops(drops)) => Ok(Some(drops_to_xrp(drops)?)),
            _ => Ok(None),
        }
    }
}
impl TryFrom<AccountTxEntry> for LedgerTx {
    type Error = anyhow::Error;

    fn try_from(entry: AccountTxEntry) -> Result<Self> {
        let amount = entry.tx.xrp_amount(entry.meta.as_ref())?;
        let tx = entry.tx;
        let ledger_index = tx
            .ledger_index
            .ok_or(anyhow!("transaction {} has no ledger index", tx.hash))?;
        let date = match tx.date {
            Some(date) => ripple_time(date)?,
            None => bail!("transaction {} has no close time", tx.hash),
        };
        Ok(LedgerTx {
            memos: tx
                .memos
                .into_iter()
                .filter_map(|m| m.memo.memo_data)
                .collect(),
            hash: tx.hash,
            account: tx.account,
            destination: tx.destination,
            amount,
            destination_tag: tx.destination_tag,
            ledger_index,
            date,
        })
    }
}
impl TryFrom<RawTxResult> for TxStatus {
    type Error = anyhow::Error;

    fn try_from(result: RawTxResult) -> Result<Self> {
        Ok(TxStatus {
            validated: result.validated,
            amount: result.tx.xrp_amount(result.meta.as_ref())?,
            ledger_index: result.tx.ledger_index,
            date: result.tx.date.map(ripple_time).transpose()?,
        })
    }
}
