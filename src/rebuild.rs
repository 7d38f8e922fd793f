//! Disaster recovery: everything but unsettled payments can be derived from
//! the memos the lotto account attached to its own outgoing payments.
use crate::classify::route;
use crate::ledger::LedgerTx;
use crate::lotto::Lotto;
use crate::memo::{Memo, MemoError};
use crate::model::*;
use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::ops::RangeInclusive;

#[derive(Debug)]
struct RestoredPrize {
    id: RowId,
    first_included_tx: TxHash,
    last_included_tx: TxHash,
    pool: PoolTag,
}

/// Pool whose threshold is closest to what the prize paid out.
fn closest_pool(pools: &[PoolTag], amount: Decimal) -> Option<PoolTag> {
    pools
        .iter()
        .copied()
        .min_by_key(|pool| (amount / Decimal::from(*pool) - Decimal::ONE).abs())
}

/// Positions of a prize's first and last included transaction. The last one
/// is searched after the first, so both must appear in that order.
fn prize_range(transactions: &[LedgerTx], first: &str, last: &str) -> Option<RangeInclusive<usize>> {
    let start = transactions.iter().position(|tx| tx.hash == first)?;
    let end = transactions[start..]
        .iter()
        .position(|tx| tx.hash == last)?;
    Some(start..=start + end)
}

impl Lotto {
    pub async fn rebuild_from_ledger(&self) -> Result<()> {
        let mut unsettled = self.db.get_payments(PaymentStatus::Pending).await?;
        unsettled.extend(self.db.get_payments(PaymentStatus::SuccessNotFinal).await?);
        if let Some(payment) = unsettled
            .iter()
            .find(|payment| payment.kind != PaymentType::Devolution)
        {
            bail!(
                "{} payment {} is still {}, settle it before rebuilding",
                payment.kind,
                payment.id,
                payment.status
            );
        }
        let transactions = self.fetch_transactions(-1).await?;
        info!(
            "Rebuilding from {} ledger transactions",
            transactions.len()
        );
        self.db.clear_derived().await?;

        let mut prizes = vec![];
        let mut restored = 0;
        for tx in &transactions {
            if tx.account != self.settings.accounts.lotto {
                continue;
            }
            let Some(data) = tx.first_memo() else {
                continue;
            };
            let memo = match Memo::from_hex(data) {
                Ok(memo) => memo,
                Err(MemoError::Hex(_) | MemoError::Utf8 | MemoError::NoMarker) => continue,
                Err(e) => {
                    warn!("Skipping {} with unreadable memo: {}", tx.hash, e);
                    continue;
                }
            };
            let (Some(destination), Some(amount)) = (tx.destination.clone(), tx.amount) else {
                warn!("Skipping {}: not an XRP payment", tx.hash);
                continue;
            };
            let payment = self
                .db
                .restore_payment(&Payment {
                    id: 0,
                    kind: memo.kind(),
                    status: PaymentStatus::SuccessFinal,
                    destination: destination.clone(),
                    amount,
                    tx_id: Some(tx.hash.clone()),
                    ledger_index: Some(tx.ledger_index),
                    date: Some(tx.date),
                    memo: memo.to_string(),
                })
                .await?;
            let (id, details) = match memo {
                Memo::Prize {
                    prize_id,
                    first_included_tx,
                    last_included_tx,
                    winner_tx,
                } => {
                    let last_included_ledger =
                        self.ledger_index_of(&transactions, &last_included_tx).await?;
                    let pool = closest_pool(&self.settings.parameters.pools, amount)
                        .ok_or(anyhow!("no pools configured"))?;
                    prizes.push(RestoredPrize {
                        id: prize_id,
                        first_included_tx,
                        last_included_tx,
                        pool,
                    });
                    (
                        Some(prize_id),
                        DisbursementDetails::Prize {
                            winner_tx,
                            participant_txs: vec![],
                            last_included_ledger,
                        },
                    )
                }
                Memo::Fee { prize_id } => (None, DisbursementDetails::Fee { prize_id }),
                Memo::Donation { prize_id } => (None, DisbursementDetails::Donation { prize_id }),
                Memo::Devolution { received_tx } => {
                    (None, DisbursementDetails::Devolution { received_tx })
                }
            };
            self.db
                .add_disbursement(
                    id,
                    &Disbursement {
                        payment_id: payment,
                        destination,
                        amount,
                        details,
                    },
                )
                .await?;
            restored += 1;
        }
        self.relink_unsettled_devolutions().await?;

        let mut folded = HashSet::new();
        let mut complete = true;
        for prize in &prizes {
            let Some(range) = prize_range(
                &transactions,
                &prize.first_included_tx,
                &prize.last_included_tx,
            ) else {
                warn!(
                    "Can't find the transactions of prize {} ({} to {})",
                    prize.id, prize.first_included_tx, prize.last_included_tx
                );
                complete = false;
                continue;
            };
            let txs = transactions[range]
                .iter()
                .filter(|tx| self.plays_in(tx, prize.pool))
                .map(|tx| tx.hash.clone())
                .collect::<Vec<_>>();
            debug!("Prize {} folded {} transactions", prize.id, txs.len());
            self.db.set_prize_participants(prize.id, &txs).await?;
            folded.extend(txs);
        }

        if complete {
            // first transaction is the account activation
            let open = transactions
                .iter()
                .skip(1)
                .filter(|tx| !folded.contains(&tx.hash))
                .cloned()
                .collect::<Vec<_>>();
            self.classify(&open).await?;
        } else {
            warn!("Not restoring open participations, some prizes are incomplete");
        }
        info!(
            "Restored {} payments, {} prizes and {} open participations",
            restored,
            prizes.len(),
            self.db.get_participants(None).await?.len()
        );
        Ok(())
    }
    fn plays_in(&self, tx: &LedgerTx, pool: PoolTag) -> bool {
        let account = &self.settings.accounts.lotto;
        tx.is_inbound(account)
            && &tx.account != account
            && tx.amount.is_some()
            && route(&self.settings, tx.destination_tag) == Some(pool)
    }
    async fn ledger_index_of(&self, transactions: &[LedgerTx], hash: &str) -> Result<LedgerIndex> {
        if let Some(tx) = transactions.iter().find(|tx| tx.hash == hash) {
            return Ok(tx.ledger_index);
        }
        self.ledger
            .get_transaction(hash)
            .await?
            .and_then(|status| status.ledger_index)
            .ok_or(anyhow!("transaction {} is not on the ledger", hash))
    }
    /// Devolutions created but not yet on the ledger lose their row when the
    /// derived tables are cleared.
    async fn relink_unsettled_devolutions(&self) -> Result<()> {
        let mut unsettled = self.db.get_payments(PaymentStatus::Pending).await?;
        unsettled.extend(self.db.get_payments(PaymentStatus::SuccessNotFinal).await?);
        for payment in unsettled {
            let received_tx = match payment.memo.parse::<Memo>() {
                Ok(Memo::Devolution { received_tx }) => received_tx,
                _ => {
                    warn!("Payment {} has no devolution memo", payment.id);
                    continue;
                }
            };
            self.db
                .add_disbursement(
                    None,
                    &Disbursement {
                        payment_id: payment.id,
                        destination: payment.destination,
                        amount: payment.amount,
                        details: DisbursementDetails::Devolution { received_tx },
                    },
                )
                .await?;
        }
        Ok(())
    }
}
