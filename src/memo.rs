//! Provenance memos attached to every outgoing payment.
//!
//! The memo is the only durable record of why a payment was made, so the
//! format is fixed: `ZERPLOTTO.COM_<TYPE>::Key=value::Key=value`, ASCII,
//! hex encoded into the first `MemoData` of the ledger transaction.
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use crate::model::{PaymentType, RowId, TxHash};

pub const MEMO_MARKER: &str = "ZERPLOTTO.COM";
const DELIMITER: &str = "::";

#[derive(Debug, Error, PartialEq)]
pub enum MemoError {
    #[error("memo data is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("memo data is not valid utf-8")]
    Utf8,
    #[error("memo has no ZERPLOTTO.COM marker")]
    NoMarker,
    #[error("unknown memo type {0}")]
    UnknownType(String),
    #[error("malformed memo field {0}")]
    MalformedField(String),
    #[error("memo is missing field {0}")]
    MissingField(&'static str),
    #[error("invalid value {value} for memo field {field}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Memo {
    Prize {
        prize_id: RowId,
        first_included_tx: TxHash,
        last_included_tx: TxHash,
        winner_tx: TxHash,
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

impl Memo {
    pub fn from_hex(data: &str) -> Result<Self, MemoError> {
        let bytes = hex::decode(data)?;
        let text = String::from_utf8(bytes).map_err(|_| MemoError::Utf8)?;
        text.parse()
    }
    #[cfg(test)]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.to_string())
    }
    pub fn kind(&self) -> PaymentType {
        match self {
            Self::Prize { .. } => PaymentType::Prize,
            Self::Fee { .. } => PaymentType::Fee,
            Self::Donation { .. } => PaymentType::Donation,
            Self::Devolution { .. } => PaymentType::Devolution,
        }
    }
}
impl Display for Memo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", MEMO_MARKER, self.kind())?;
        match self {
            Self::Prize {
                prize_id,
                first_included_tx,
                last_included_tx,
                winner_tx,
            } => write!(
                f,
                "{d}Prize_id={}{d}First_included_TX={}{d}Last_included_TX={}{d}Winner_TX={}",
                prize_id,
                first_included_tx,
                last_included_tx,
                winner_tx,
                d = DELIMITER
            ),
            Self::Fee { prize_id } | Self::Donation { prize_id } => {
                write!(f, "{}Prize_id={}", DELIMITER, prize_id)
            }
            Self::Devolution { received_tx } => {
                write!(f, "{}Received_TX={}", DELIMITER, received_tx)
            }
        }
    }
}
impl FromStr for Memo {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(DELIMITER);
        let head = parts.next().unwrap_or_default();
        let tag = head
            .strip_prefix(MEMO_MARKER)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or(MemoError::NoMarker)?;
        let mut fields = HashMap::new();
        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| MemoError::MalformedField(part.to_string()))?;
            fields.insert(key, value);
        }
        let text = |key: &'static str| -> Result<TxHash, MemoError> {
            match fields.get(key) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(MemoError::MissingField(key)),
            }
        };
        let id = |key: &'static str| -> Result<RowId, MemoError> {
            let value = text(key)?;
            value
                .parse()
                .map_err(|_| MemoError::InvalidValue { field: key, value })
        };
        match tag {
            "PRIZE" => Ok(Self::Prize {
                prize_id: id("Prize_id")?,
                first_included_tx: text("First_included_TX")?,
                last_included_tx: text("Last_included_TX")?,
                winner_tx: text("Winner_TX")?,
            }),
            "FEE" => Ok(Self::Fee {
                prize_id: id("Prize_id")?,
            }),
            "DONATION" => Ok(Self::Donation {
                prize_id: id("Prize_id")?,
            }),
            "DEVOLUTION" => Ok(Self::Devolution {
                received_tx: text("Received_TX")?,
            }),
            other => Err(MemoError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prize_memo_layout() {
        let memo = Memo::Prize {
            prize_id: 7,
            first_included_tx: "AAA".into(),
            last_included_tx: "BBB".into(),
            winner_tx: "CCC".into(),
        };
        assert_eq!(
            memo.to_string(),
            "ZERPLOTTO.COM_PRIZE::Prize_id=7::First_included_TX=AAA::Last_included_TX=BBB::Winner_TX=CCC"
        );
        assert_eq!(Memo::from_hex(&memo.to_hex()).unwrap(), memo);
    }
    #[test]
    fn short_memos() {
        assert_eq!(
            Memo::Fee { prize_id: 3 }.to_string(),
            "ZERPLOTTO.COM_FEE::Prize_id=3"
        );
        assert_eq!(
            "ZERPLOTTO.COM_DONATION::Prize_id=3".parse::<Memo>().unwrap(),
            Memo::Donation { prize_id: 3 }
        );
        assert_eq!(
            "ZERPLOTTO.COM_DEVOLUTION::Received_TX=F00".parse::<Memo>().unwrap(),
            Memo::Devolution {
                received_tx: "F00".into()
            }
        );
    }
    #[test]
    fn rejects_unrecognized_payloads() {
        assert_eq!(
            "hello".parse::<Memo>().unwrap_err(),
            MemoError::NoMarker
        );
        assert_eq!(
            "ZERPLOTTO.COM_JACKPOT::Prize_id=1".parse::<Memo>().unwrap_err(),
            MemoError::UnknownType("JACKPOT".into())
        );
        assert_eq!(
            "ZERPLOTTO.COM_FEE".parse::<Memo>().unwrap_err(),
            MemoError::MissingField("Prize_id")
        );
        assert_eq!(
            "ZERPLOTTO.COM_FEE::Prize_id=x".parse::<Memo>().unwrap_err(),
            MemoError::InvalidValue {
                field: "Prize_id",
                value: "x".into()
            }
        );
        assert_eq!(
            "ZERPLOTTO.COM_FEE::Prize_id".parse::<Memo>().unwrap_err(),
            MemoError::MalformedField("Prize_id".into())
        );
        assert!(matches!(Memo::from_hex("zz"), Err(MemoError::Hex(_))));
    }
}
