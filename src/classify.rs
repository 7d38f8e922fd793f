use crate::ledger::LedgerTx;
use crate::lotto::Lotto;
use crate::memo::Memo;
use crate::model::*;
use crate::settings::Settings;
use anyhow::Result;
use log::{debug, info, trace};
use rust_decimal::Decimal;

/// Pool a deposit with the given destination tag plays in. Reserved tags
/// don't play at all, unknown or missing tags go to the catch-all pool.
pub fn route(settings: &Settings, tag: Option<u32>) -> Option<PoolTag> {
    let parameters = &settings.parameters;
    match tag {
        Some(tag) if parameters.reserved_tags.contains(&tag) => None,
        Some(tag) if parameters.pools.contains(&tag) => Some(tag),
        _ => Some(settings.default_pool()),
    }
}

/// Largest amount a single deposit may play with in `pool`.
pub fn participation_cap(settings: &Settings, pool: PoolTag) -> Decimal {
    truncate_amount(settings.parameters.max_participation_ratio * Decimal::from(pool))
}

impl Lotto {
    /// Admits inbound deposits as participants, refunding what exceeds the
    /// participation cap. Safe to call again with the same transactions.
    pub async fn classify(&self, transactions: &[LedgerTx]) -> Result<()> {
        let account = &self.settings.accounts.lotto;
        for tx in transactions {
            if !tx.is_inbound(account) || &tx.account == account {
                continue;
            }
            let Some(amount) = tx.amount else {
                debug!("Ignoring non-XRP deposit {}", tx.hash);
                continue;
            };
            let Some(pool) = route(&self.settings, tx.destination_tag) else {
                trace!("Ignoring {} with reserved tag", tx.hash);
                continue;
            };
            let cap = participation_cap(&self.settings, pool);
            let mut admitted = amount;
            if amount > cap {
                admitted = cap;
                if !self.db.devolution_exists(&tx.hash).await? {
                    self.refund(tx, amount - cap).await?;
                }
            }
            if admitted <= Decimal::ZERO {
                continue;
            }
            let added = self
                .db
                .add_participant(&Participant {
                    id: 0,
                    address: tx.account.clone(),
                    amount: admitted,
                    pool,
                    tx_id: tx.hash.clone(),
                    ledger_index: tx.ledger_index,
                    date: tx.date,
                })
                .await?;
            if added {
                debug!(
                    "{} plays {} XRP in pool {} ({})",
                    tx.account, admitted, pool, tx.hash
                );
            }
        }
        Ok(())
    }
    async fn refund(&self, tx: &LedgerTx, excess: Decimal) -> Result<()> {
        let memo = Memo::Devolution {
            received_tx: tx.hash.clone(),
        };
        let payment = self
            .db
            .add_payment(
                PaymentType::Devolution,
                &tx.account,
                excess,
                &memo.to_string(),
            )
            .await?;
        self.db
            .add_disbursement(
                None,
                &Disbursement {
                    payment_id: payment,
                    destination: tx.account.clone(),
                    amount: excess,
                    details: DisbursementDetails::Devolution {
                        received_tx: tx.hash.clone(),
                    },
                },
            )
            .await?;
        info!("Refunding {} XRP of {} to {}", excess, tx.hash, tx.account);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lotto::testing::*;
    use crate::settings::test_settings;
    use rust_decimal_macros::dec;

    #[test]
    fn routing() {
        let settings = test_settings();
        assert_eq!(route(&settings, Some(10)), Some(10));
        assert_eq!(route(&settings, Some(100)), Some(100));
        assert_eq!(route(&settings, Some(7)), Some(100));
        assert_eq!(route(&settings, None), Some(100));
        assert_eq!(route(&settings, Some(1)), None);
        assert_eq!(participation_cap(&settings, 100), dec!(50));
    }
    #[tokio::test]
    async fn excess_is_refunded() {
        let (lotto, ledger, _) = test_lotto().await;
        deposit(&ledger, "A", dec!(150), Some(100));
        lotto.classify(&ledger.transactions()).await.unwrap();
        let participants = lotto.db.get_participants(Some(100)).await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].amount, dec!(50));
        assert_eq!(participants[0].address, "rPlayerA");
        let pending = lotto.db.get_payments(PaymentStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, PaymentType::Devolution);
        assert_eq!(pending[0].amount, dec!(100));
        assert_eq!(pending[0].destination, "rPlayerA");
        assert_eq!(pending[0].memo, "ZERPLOTTO.COM_DEVOLUTION::Received_TX=A");
        let (_, devolution) = lotto
            .db
            .get_disbursement(PaymentType::Devolution, pending[0].id)
            .await
            .unwrap();
        assert_eq!(
            devolution.details,
            DisbursementDetails::Devolution {
                received_tx: "A".into()
            }
        );
    }
    #[tokio::test]
    async fn admission_is_idempotent() {
        let (lotto, ledger, _) = test_lotto().await;
        deposit(&ledger, "A", dec!(150), Some(100));
        deposit(&ledger, "B", dec!(3), Some(10));
        lotto.classify(&ledger.transactions()).await.unwrap();
        lotto.classify(&ledger.transactions()).await.unwrap();
        assert_eq!(lotto.db.get_participants(None).await.unwrap().len(), 2);
        assert_eq!(
            lotto.db.get_payments(PaymentStatus::Pending).await.unwrap().len(),
            1
        );
    }
    #[tokio::test]
    async fn skips_reserved_and_outgoing() {
        let (lotto, ledger, _) = test_lotto().await;
        deposit(&ledger, "A", dec!(3), Some(1));
        deposit(&ledger, "B", dec!(3), Some(42));
        ledger.push(crate::ledger::payment(
            "OUT",
            "rLotto",
            "rPlayerB",
            dec!(1),
            None,
            9,
        ));
        lotto.classify(&ledger.transactions()).await.unwrap();
        let participants = lotto.db.get_participants(None).await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].tx_id, "B");
        assert_eq!(participants[0].pool, 100);
    }
}
