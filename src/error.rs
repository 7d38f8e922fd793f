use std::path::PathBuf;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::PoolTag;

/// Conditions that abort the remainder of a cycle. Anything already
/// committed stays committed; the next run resumes from the checkpoint.
#[derive(Debug, Error)]
pub enum LottoError {
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("no new transactions received from the ledger")]
    Ingestion,
    #[error(
        "insufficient funds in pool {pool}: paying out {required} from a balance of {balance} \
        would break the reserve of {reserve}"
    )]
    InsufficientFunds {
        pool: PoolTag,
        required: Decimal,
        balance: Decimal,
        reserve: Decimal,
    },
    #[error("payment submission failed: {0}")]
    PaymentSubmission(String),
    #[error("lotto is locked ({} exists)", .0.display())]
    Locked(PathBuf),
}

impl From<reqwest::Error> for LottoError {
    fn from(value: reqwest::Error) -> Self {
        LottoError::LedgerUnavailable(value.to_string())
    }
}
