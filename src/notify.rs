use crate::model::{Disbursement, Payment};
use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};

#[async_trait]
pub trait Notifier {
    /// Announces a payment that reached finality on the ledger.
    async fn payment_finalized(&self, payment: &Payment, disbursement: &Disbursement)
        -> Result<()>;
    /// Operator channel for conditions that need a human.
    async fn alert(&self, message: &str) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_finalized(
        &self,
        payment: &Payment,
        disbursement: &Disbursement,
    ) -> Result<()> {
        info!(
            "{} {} of {} XRP to {} is final in ledger {}",
            payment.kind,
            payment.id,
            payment.amount,
            payment.destination,
            payment.ledger_index.unwrap_or_default()
        );
        info!("{}", disbursement);
        Ok(())
    }
    async fn alert(&self, message: &str) -> Result<()> {
        error!("ALERT: {}", message);
        Ok(())
    }
}

#[cfg(test)]
pub use self::recording::RecordingNotifier;

#[cfg(test)]
mod recording {
    use super::*;
    use crate::model::RowId;
    use anyhow::bail;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default, Clone)]
    pub struct RecordingNotifier {
        pub finalized: Arc<Mutex<Vec<RowId>>>,
        pub alerts: Arc<Mutex<Vec<String>>>,
        pub fail: bool,
    }
    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn payment_finalized(
            &self,
            payment: &Payment,
            _disbursement: &Disbursement,
        ) -> Result<()> {
            self.finalized.lock().unwrap().push(payment.id);
            if self.fail {
                bail!("notification channel down");
            }
            Ok(())
        }
        async fn alert(&self, message: &str) -> Result<()> {
            self.alerts.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }
}
