use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

use super::TxHash;

/// Seconds between the unix epoch and the ripple epoch (2000-01-01T00:00:00Z).
pub const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;
/// Ledger amounts are whole drops, one millionth of an XRP.
pub const AMOUNT_SCALE: u32 = 6;

pub fn drops_to_xrp(drops: &str) -> Result<Decimal> {
    let drops: i64 = drops
        .parse()
        .with_context(|| format!("invalid drops amount {}", drops))?;
    Ok(Decimal::new(drops, AMOUNT_SCALE))
}
pub fn xrp_to_drops(amount: Decimal) -> Result<u64> {
    (truncate_amount(amount) * Decimal::from(1_000_000))
        .to_u64()
        .ok_or(anyhow!("amount {} can't be expressed in drops", amount))
}
pub fn ripple_time(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(RIPPLE_EPOCH_OFFSET + seconds, 0)
        .single()
        .ok_or(anyhow!("invalid ripple timestamp {}", seconds))
}
/// Truncates towards zero at the ledger's precision, never rounding up.
pub fn truncate_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
}
pub fn join_txs(txs: &[TxHash]) -> String {
    txs.join(",")
}
pub fn split_txs(txs: &str) -> Vec<TxHash> {
    txs.split(',')
        .map(str::trim)
        .filter(|tx| !tx.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn drops() {
        assert_eq!(drops_to_xrp("150000000").unwrap(), dec!(150));
        assert_eq!(drops_to_xrp("1").unwrap(), dec!(0.000001));
        assert!(drops_to_xrp("1.5").is_err());
        assert_eq!(xrp_to_drops(dec!(2.5000019)).unwrap(), 2_500_001);
    }
    #[test]
    fn ripple_epoch() {
        let date = ripple_time(0).unwrap();
        assert_eq!(date.to_rfc3339(), "2000-01-01T00:00:00+00:00");
    }
    #[test]
    fn tx_lists() {
        let txs = vec!["A".to_string(), "B".to_string()];
        assert_eq!(join_txs(&txs), "A,B");
        assert_eq!(split_txs("A, B"), txs);
        assert!(split_txs("").is_empty());
    }
}
