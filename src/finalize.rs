use crate::ledger::TxStatus;
use crate::lotto::Lotto;
use crate::model::*;
use anyhow::Result;
use log::{info, warn};

impl Lotto {
    /// Moves submitted payments to `SUCCESS_FINAL` once the ledger validated
    /// them. Anything not validated yet is left for the next cycle.
    pub async fn check_payments(&self) -> Result<()> {
        for payment in self.db.get_unfinalized_payments().await? {
            let Some(tx_id) = payment.tx_id.as_deref() else {
                continue;
            };
            let status = self.ledger.get_transaction(tx_id).await?;
            let (amount, ledger_index, date) = match status {
                Some(TxStatus {
                    validated: true,
                    amount: Some(amount),
                    ledger_index: Some(ledger_index),
                    date: Some(date),
                }) => (amount, ledger_index, date),
                _ => {
                    warn!(
                        "{} payment {} ({}) is not final yet",
                        payment.kind, payment.id, tx_id
                    );
                    continue;
                }
            };
            self.db
                .finalize_payment(payment.id, amount, ledger_index, date)
                .await?;
            self.db
                .set_disbursement_amount(payment.kind, payment.id, amount)
                .await?;
            info!(
                "{} payment {} of {} XRP is final in ledger {}",
                payment.kind, payment.id, amount, ledger_index
            );
            if self.settings.parameters.notify && payment.kind != PaymentType::Devolution {
                if let Err(e) = self.announce(payment.id).await {
                    warn!("Couldn't notify about payment {}: {:#}", payment.id, e);
                }
            }
        }
        Ok(())
    }
    async fn announce(&self, payment: RowId) -> Result<()> {
        let payment = self.db.get_payment(payment).await?;
        let (_, disbursement) = self.db.get_disbursement(payment.kind, payment.id).await?;
        self.notifier
            .payment_finalized(&payment, &disbursement)
            .await
    }
}

#[cfg(test)]
mod test {
    use crate::ledger::{payment, TxStatus};
    use crate::lotto::testing::*;
    use crate::model::*;
    use crate::notify::RecordingNotifier;
    use crate::submitter::PaymentSubmitter;
    use rust_decimal_macros::dec;

    async fn submitted_fee(lotto: &crate::lotto::Lotto, hash: &str) -> RowId {
        let id = lotto
            .db
            .add_payment(PaymentType::Fee, "rFees", dec!(0.3), "ZERPLOTTO.COM_FEE::Prize_id=1")
            .await
            .unwrap();
        lotto
            .db
            .add_disbursement(
                None,
                &Disbursement {
                    payment_id: id,
                    destination: "rFees".into(),
                    amount: dec!(0.3),
                    details: DisbursementDetails::Fee { prize_id: 1 },
                },
            )
            .await
            .unwrap();
        lotto.db.set_payment_submitted(id, hash).await.unwrap();
        id
    }

    #[tokio::test]
    async fn finalizes_validated_payments() {
        let (lotto, ledger, notifier) = test_lotto().await;
        let id = submitted_fee(&lotto, "FEE").await;
        ledger.push(payment("FEE", "rLotto", "rFees", dec!(0.299999), None, 40));
        lotto.check_payments().await.unwrap();
        let payment = lotto.db.get_payment(id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::SuccessFinal);
        assert_eq!(payment.amount, dec!(0.299999));
        assert_eq!(payment.ledger_index, Some(40));
        let (_, fee) = lotto.db.get_disbursement(PaymentType::Fee, id).await.unwrap();
        assert_eq!(fee.amount, dec!(0.299999));
        assert_eq!(*notifier.finalized.lock().unwrap(), vec![id]);
    }
    #[tokio::test]
    async fn leaves_unvalidated_payments() {
        let (lotto, ledger, notifier) = test_lotto().await;
        let unknown = submitted_fee(&lotto, "MISSING").await;
        let open = submitted_fee(&lotto, "OPEN").await;
        ledger.set_status(
            "OPEN",
            TxStatus {
                validated: false,
                amount: Some(dec!(0.3)),
                ledger_index: None,
                date: None,
            },
        );
        lotto.check_payments().await.unwrap();
        for id in [unknown, open] {
            let payment = lotto.db.get_payment(id).await.unwrap();
            assert_eq!(payment.status, PaymentStatus::SuccessNotFinal);
        }
        assert!(notifier.finalized.lock().unwrap().is_empty());
    }
    #[tokio::test]
    async fn notification_failure_keeps_finality() {
        let ledger = crate::ledger::TestLedger::new(dec!(1000));
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let lotto = crate::lotto::Lotto::new(
            Box::new(crate::db::SQLite::new(None).await.unwrap()),
            Box::new(ledger.clone()),
            Box::new(notifier.clone()),
            crate::settings::test_settings(),
        );
        let id = submitted_fee(&lotto, "FEE").await;
        ledger.push(payment("FEE", "rLotto", "rFees", dec!(0.3), None, 40));
        lotto.check_payments().await.unwrap();
        assert_eq!(notifier.finalized.lock().unwrap().len(), 1);
        assert_eq!(
            lotto.db.get_payment(id).await.unwrap().status,
            PaymentStatus::SuccessFinal
        );
    }
    #[tokio::test]
    async fn devolutions_are_not_announced() {
        let (lotto, ledger, notifier) = test_lotto().await;
        deposit(&ledger, "A", dec!(150), Some(100));
        lotto.classify(&ledger.transactions()).await.unwrap();
        let pending = lotto.db.get_payments(PaymentStatus::Pending).await.unwrap();
        lotto.test_submitter(&ledger).submit(&pending).await.unwrap();
        lotto.check_payments().await.unwrap();
        assert_eq!(
            lotto.db.get_payment(pending[0].id).await.unwrap().status,
            PaymentStatus::SuccessFinal
        );
        assert!(notifier.finalized.lock().unwrap().is_empty());
    }
}
