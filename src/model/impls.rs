use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;

use super::*;

impl Display for PaymentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Prize => "PRIZE",
            Self::Fee => "FEE",
            Self::Donation => "DONATION",
            Self::Devolution => "DEVOLUTION",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for PaymentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PRIZE" => Ok(Self::Prize),
            "FEE" => Ok(Self::Fee),
            "DONATION" => Ok(Self::Donation),
            "DEVOLUTION" => Ok(Self::Devolution),
            e => bail!("Couldn't deserialize to PaymentType: {}", e),
        }
    }
}
impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Pending => "PENDING",
            Self::SuccessNotFinal => "SUCCESS_NOT_FINAL",
            Self::SuccessFinal => "SUCCESS_FINAL",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS_NOT_FINAL" => Ok(Self::SuccessNotFinal),
            "SUCCESS_FINAL" => Ok(Self::SuccessFinal),
            e => bail!("Couldn't deserialize to PaymentStatus: {}", e),
        }
    }
}
impl DisbursementDetails {
    pub fn kind(&self) -> PaymentType {
        match self {
            Self::Prize { .. } => PaymentType::Prize,
            Self::Fee { .. } => PaymentType::Fee,
            Self::Donation { .. } => PaymentType::Donation,
            Self::Devolution { .. } => PaymentType::Devolution,
        }
    }
}
impl Display for Disbursement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            DisbursementDetails::Prize {
                winner_tx,
                participant_txs,
                ..
            } => write!(
                f,
                "prize of {} to {} (winner tx {}, {} participations)",
                self.amount,
                self.destination,
                winner_tx,
                participant_txs.len()
            ),
            DisbursementDetails::Fee { prize_id } => {
                write!(f, "fee of {} for prize {}", self.amount, prize_id)
            }
            DisbursementDetails::Donation { prize_id } => write!(
                f,
                "donation of {} to {} for prize {}",
                self.amount, self.destination, prize_id
            ),
            DisbursementDetails::Devolution { received_tx } => write!(
                f,
                "devolution of {} to {} for tx {}",
                self.amount, self.destination, received_tx
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payment_enums_use_stored_names() {
        for kind in [
            PaymentType::Prize,
            PaymentType::Fee,
            PaymentType::Donation,
            PaymentType::Devolution,
        ] {
            assert_eq!(PaymentType::from_str(&kind.to_string()).unwrap(), kind);
        }
        assert_eq!(PaymentStatus::SuccessNotFinal.to_string(), "SUCCESS_NOT_FINAL");
        assert!(PaymentStatus::from_str("ERROR").is_err());
    }
}
