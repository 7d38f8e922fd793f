use crate::error::LottoError;
use crate::lotto::{Cycle, Lotto};
use crate::model::*;
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use secp256k1::rand::distributions::{Distribution, WeightedIndex};
use secp256k1::rand::rngs::OsRng;
use secp256k1::rand::seq::IteratorRandom;
use secp256k1::rand::{CryptoRng, Rng};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct PrizeSplit {
    pub fee: Decimal,
    pub donation: Decimal,
    pub prize: Decimal,
}

/// Splits a pool total. Each part is truncated on its own, whatever is
/// left over (under three drops) stays in the account.
pub fn split_amounts(total: Decimal, fee_ratio: Decimal, donation_ratio: Decimal) -> PrizeSplit {
    PrizeSplit {
        fee: truncate_amount(fee_ratio * total),
        donation: truncate_amount(donation_ratio * total),
        prize: truncate_amount(total - fee_ratio * total - donation_ratio * total),
    }
}

/// Index of the winning participant, weighted by the amount played.
pub fn select_winner<R: Rng + CryptoRng>(
    participants: &[Participant],
    rng: &mut R,
) -> Result<usize> {
    let weights = participants
        .iter()
        .map(|p| xrp_to_drops(p.amount))
        .collect::<Result<Vec<_>>>()?;
    let index = WeightedIndex::new(weights)
        .map_err(|e| anyhow!("can't draw a winner: {}", e))?;
    Ok(index.sample(rng))
}

impl Lotto {
    /// Pays out every pool as often as its participants reach the threshold.
    /// Returns whether any payment is waiting to be submitted.
    pub async fn process_prizes(&self, cycle: &mut Cycle) -> Result<bool> {
        let reserve = self.settings.parameters.reserved_balance;
        self.drop_folded_participants().await?;
        for pool in self.settings.parameters.pools.clone() {
            let threshold = Decimal::from(pool);
            loop {
                let participants = self.db.get_participants(Some(pool)).await?;
                if participants.is_empty() {
                    break;
                }
                let mut total = Decimal::ZERO;
                let mut count = 0;
                for participant in &participants {
                    if total >= threshold {
                        break;
                    }
                    total += participant.amount;
                    count += 1;
                }
                if cycle.balance - total < reserve {
                    let err = LottoError::InsufficientFunds {
                        pool,
                        required: total,
                        balance: cycle.balance,
                        reserve,
                    };
                    error!("{}", err);
                    return Err(err.into());
                }
                if total < threshold {
                    debug!("Pool {} at {} of {}", pool, total, threshold);
                    break;
                }
                self.pay_prize(pool, &participants[..count], total).await?;
                cycle.balance -= total;
            }
        }
        self.db.has_pending_payments().await
    }
    /// Removes participants that a stored prize already paid for.
    async fn drop_folded_participants(&self) -> Result<()> {
        let participants = self.db.get_participants(None).await?;
        let oldest = match participants.iter().map(|p| p.ledger_index).min() {
            Some(oldest) => oldest,
            None => return Ok(()),
        };
        let folded = self
            .db
            .get_prizes_since(oldest)
            .await?
            .into_iter()
            .flat_map(|prize| prize.participant_txs)
            .collect::<HashSet<_>>();
        let stale = participants
            .iter()
            .filter(|p| folded.contains(&p.tx_id))
            .map(|p| p.id)
            .collect::<Vec<_>>();
        if !stale.is_empty() {
            warn!(
                "Dropping {} participants that were already paid out",
                stale.len()
            );
            self.db.delete_participants(&stale).await?;
        }
        Ok(())
    }
    async fn pay_prize(
        &self,
        pool: PoolTag,
        participants: &[Participant],
        total: Decimal,
    ) -> Result<RowId> {
        let parameters = &self.settings.parameters;
        let accounts = &self.settings.accounts;
        let last = participants
            .last()
            .ok_or(anyhow!("pool {} has no participants to draw from", pool))?;
        let mut rng = OsRng;
        let winner = &participants[select_winner(participants, &mut rng)?];
        let donation_account = accounts
            .donations
            .values()
            .choose(&mut rng)
            .ok_or(anyhow!("no donation account configured"))?;
        let split = split_amounts(
            total,
            parameters.platform_fee_ratio,
            parameters.donation_fee_ratio,
        );
        let shares = [
            (PaymentType::Fee, &accounts.fees, split.fee),
            (PaymentType::Donation, donation_account, split.donation),
        ]
        .into_iter()
        .filter(|(_, _, amount)| *amount > Decimal::ZERO)
        .map(|(kind, destination, amount)| PrizeShare {
            kind,
            destination: destination.clone(),
            amount,
        })
        .collect::<Vec<_>>();
        let payout = Payout {
            destination: winner.address.clone(),
            amount: split.prize,
            details: DisbursementDetails::Prize {
                winner_tx: winner.tx_id.clone(),
                participant_txs: participants.iter().map(|p| p.tx_id.clone()).collect(),
                last_included_ledger: last.ledger_index,
            },
            shares,
            folded: participants.iter().map(|p| p.id).collect(),
        };
        let prize = self.db.record_payout(&payout).await?;
        info!(
            "Prize {} of pool {}: {} XRP to {} ({} participants, {} XRP played)",
            prize,
            pool,
            split.prize,
            winner.address,
            participants.len(),
            total
        );
        for share in &payout.shares {
            debug!(
                "{} of {} XRP to {} for prize {}",
                share.kind, share.amount, share.destination, prize
            );
        }
        Ok(prize)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lotto::testing::*;
    use rust_decimal_macros::dec;

    fn participant(amount: Decimal) -> Participant {
        Participant {
            id: 0,
            address: "rPlayer".into(),
            amount,
            pool: 10,
            tx_id: "A".into(),
            ledger_index: 1,
            date: ripple_time(0).unwrap(),
        }
    }

    #[test]
    fn truncation_law() {
        for total in [dec!(100), dec!(100.000001), dec!(10.999999), dec!(1234.567891)] {
            let split = split_amounts(total, dec!(0.03), dec!(0.02));
            for (part, ratio) in [
                (split.fee, dec!(0.03)),
                (split.donation, dec!(0.02)),
                (split.prize, dec!(0.95)),
            ] {
                let scaled = ratio * total * dec!(1000000);
                assert_eq!(part, scaled.floor() / dec!(1000000));
            }
            let residue = total - split.fee - split.donation - split.prize;
            assert!(residue >= Decimal::ZERO);
            assert!(residue < dec!(0.000003));
        }
        let split = split_amounts(dec!(100), dec!(0.03), dec!(0.02));
        assert_eq!(split.fee, dec!(3));
        assert_eq!(split.donation, dec!(2));
        assert_eq!(split.prize, dec!(95));
    }
    #[test]
    fn winner_is_weighted_by_amount() {
        let participants = vec![participant(dec!(1)), participant(dec!(3))];
        let trials = 40_000;
        let mut rng = OsRng;
        let heavy = (0..trials)
            .filter(|_| select_winner(&participants, &mut rng).unwrap() == 1)
            .count();
        let share = heavy as f64 / trials as f64;
        assert!((share - 0.75).abs() < 0.02, "share was {}", share);
    }
    #[test]
    fn nobody_to_draw() {
        assert!(select_winner(&[], &mut OsRng).is_err());
        assert!(select_winner(&[participant(Decimal::ZERO)], &mut OsRng).is_err());
    }
    #[tokio::test]
    async fn pays_out_every_full_round() {
        let (lotto, ledger, _) = test_lotto().await;
        for hash in ["A", "B", "C", "D", "E"] {
            deposit(&ledger, hash, dec!(5), Some(10));
        }
        lotto.classify(&ledger.transactions()).await.unwrap();
        let mut cycle = Cycle {
            balance: dec!(1000),
            transactions: vec![],
        };
        assert!(lotto.process_prizes(&mut cycle).await.unwrap());
        assert_eq!(cycle.balance, dec!(980));
        let prizes = lotto.db.get_disbursements(PaymentType::Prize).await.unwrap();
        assert_eq!(prizes.len(), 2);
        let (first_id, first) = &prizes[0];
        let DisbursementDetails::Prize {
            participant_txs,
            last_included_ledger,
            winner_tx,
        } = &first.details
        else {
            panic!("not a prize");
        };
        assert_eq!(participant_txs, &vec!["A".to_string(), "B".to_string()]);
        assert_eq!(*last_included_ledger, 2);
        assert!(participant_txs.contains(winner_tx));
        assert_eq!(first.amount, dec!(9.5));
        let payment = lotto.db.get_payment(first.payment_id).await.unwrap();
        assert_eq!(
            payment.memo,
            format!(
                "ZERPLOTTO.COM_PRIZE::Prize_id={}::First_included_TX=A::Last_included_TX=B::Winner_TX={}",
                first_id, winner_tx
            )
        );
        let fees = lotto.db.get_disbursements(PaymentType::Fee).await.unwrap();
        assert_eq!(fees.len(), 2);
        assert_eq!(fees[0].1.amount, dec!(0.3));
        assert_eq!(fees[0].1.destination, "rFees");
        let donations = lotto.db.get_disbursements(PaymentType::Donation).await.unwrap();
        assert_eq!(donations[1].1.details, DisbursementDetails::Donation { prize_id: prizes[1].0 });
        assert_eq!(donations[1].1.destination, "rCharity");
        let left = lotto.db.get_participants(None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].tx_id, "E");
    }
    #[tokio::test]
    async fn reserve_is_checked_before_any_write() {
        let (lotto, ledger, _) = test_lotto().await;
        deposit(&ledger, "A", dec!(5), Some(10));
        deposit(&ledger, "B", dec!(5), Some(10));
        lotto.classify(&ledger.transactions()).await.unwrap();
        let mut cycle = Cycle {
            balance: dec!(29),
            transactions: vec![],
        };
        let err = lotto.process_prizes(&mut cycle).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LottoError>(),
            Some(LottoError::InsufficientFunds { pool: 10, .. })
        ));
        assert!(!lotto.db.has_pending_payments().await.unwrap());
        assert_eq!(lotto.db.get_participants(None).await.unwrap().len(), 2);
        // exactly the reserve left is fine
        cycle.balance = dec!(30);
        assert!(lotto.process_prizes(&mut cycle).await.unwrap());
    }
    #[tokio::test]
    async fn empty_pools_skip_the_reserve_check() {
        let (lotto, _, _) = test_lotto().await;
        let mut cycle = Cycle {
            balance: dec!(19.99999),
            transactions: vec![],
        };
        assert!(!lotto.process_prizes(&mut cycle).await.unwrap());
        assert_eq!(cycle.balance, dec!(19.99999));
    }
    #[tokio::test]
    async fn participants_of_a_stored_prize_are_not_paid_twice() {
        let (lotto, ledger, _) = test_lotto().await;
        deposit(&ledger, "A", dec!(5), Some(10));
        deposit(&ledger, "B", dec!(5), Some(10));
        lotto.classify(&ledger.transactions()).await.unwrap();
        let mut cycle = Cycle {
            balance: dec!(1000),
            transactions: vec![],
        };
        lotto.process_prizes(&mut cycle).await.unwrap();
        // participant rows that outlived their prize
        lotto.classify(&ledger.transactions()).await.unwrap();
        assert_eq!(lotto.db.get_participants(None).await.unwrap().len(), 2);
        lotto.process_prizes(&mut cycle).await.unwrap();
        let prizes = lotto.db.get_disbursements(PaymentType::Prize).await.unwrap();
        assert_eq!(prizes.len(), 1);
        assert!(lotto.db.get_participants(None).await.unwrap().is_empty());
        assert_eq!(cycle.balance, dec!(990));
    }
}
