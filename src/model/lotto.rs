use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type RowId = i64;
pub type TxHash = String;
pub type Address = String;
pub type PoolTag = u32;
pub type LedgerIndex = i64;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PaymentType {
    Prize,
    Fee,
    Donation,
    Devolution,
}
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    SuccessNotFinal,
    SuccessFinal,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: RowId,
    pub kind: PaymentType,
    pub status: PaymentStatus,
    pub destination: Address,
    pub amount: Decimal,
    pub tx_id: Option<TxHash>,
    pub ledger_index: Option<LedgerIndex>,
    pub date: Option<DateTime<Utc>>,
    pub memo: String,
}
/// Type specific provenance of a payment. Stored in one table per variant,
/// joined to its payment by `payment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisbursementDetails {
    Prize {
        winner_tx: TxHash,
        participant_txs: Vec<TxHash>,
        last_included_ledger: LedgerIndex,
    },
    Fee {
        prize_id: RowId,
    },
    Donation {
        prize_id: RowId,
    },
    Devolution {
        received_tx: TxHash,
    },
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    pub payment_id: RowId,
    pub destination: Address,
    pub amount: Decimal,
    pub details: DisbursementDetails,
}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: RowId,
    pub address: Address,
    pub amount: Decimal,
    pub pool: PoolTag,
    pub tx_id: TxHash,
    pub ledger_index: LedgerIndex,
    pub date: DateTime<Utc>,
}
/// Fee or donation taken out of a prize.
#[derive(Debug, Clone, PartialEq)]
pub struct PrizeShare {
    pub kind: PaymentType,
    pub destination: Address,
    pub amount: Decimal,
}
/// Everything a single pool payout writes. `details` is the prize variant,
/// `folded` the participant rows it consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub destination: Address,
    pub amount: Decimal,
    pub details: DisbursementDetails,
    pub shares: Vec<PrizeShare>,
    pub folded: Vec<RowId>,
}
/// Latest prize as needed for checkpointing and ingestion de-dup.
#[derive(Debug, Clone, PartialEq)]
pub struct PrizeSnapshot {
    pub id: RowId,
    pub participant_txs: Vec<TxHash>,
    pub last_included_ledger: LedgerIndex,
}
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    pub pool: PoolTag,
    pub participants: usize,
    pub balance: Decimal,
    pub percent: Decimal,
}
