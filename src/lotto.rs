use crate::db::DB;
use crate::ledger::{Ledger, LedgerTx};
use crate::lock::LockFile;
use crate::model::*;
use crate::notify::Notifier;
use crate::settings::Settings;
use crate::submitter::PaymentSubmitter;
use anyhow::Result;
use log::{debug, error, info};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;

/// State of a single run, fetched fresh at the start of every cycle.
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Account balance, reduced by every payout made during the cycle.
    pub balance: Decimal,
    pub transactions: Vec<LedgerTx>,
}

pub struct Lotto {
    pub(crate) db: Arc<Box<dyn DB + Send + Sync>>,
    pub(crate) ledger: Arc<Box<dyn Ledger + Send + Sync>>,
    pub(crate) notifier: Arc<Box<dyn Notifier + Send + Sync>>,
    pub(crate) settings: Settings,
}

impl Lotto {
    pub fn new(
        db: Box<dyn DB + Send + Sync>,
        ledger: Box<dyn Ledger + Send + Sync>,
        notifier: Box<dyn Notifier + Send + Sync>,
        settings: Settings,
    ) -> Self {
        Self {
            db: Arc::new(db),
            ledger: Arc::new(ledger),
            notifier: Arc::new(notifier),
            settings,
        }
    }
    /// Ledger index ingestion resumes from. Derived from durable state only:
    /// the newest participant, else the newest prize, else the whole history.
    pub async fn checkpoint(&self) -> Result<LedgerIndex> {
        let derived = match self.db.get_last_participant_ledger().await? {
            Some(ledger_index) => ledger_index,
            None => match self.db.get_last_prize().await? {
                Some(prize) => prize.last_included_ledger,
                None => -1,
            },
        };
        let start = self.settings.parameters.start_from_ledger;
        if start > derived {
            debug!("Starting from configured ledger {} instead of {}", start, derived);
            return Ok(start);
        }
        Ok(derived)
    }
    pub async fn begin_cycle(&self) -> Result<Cycle> {
        let checkpoint = self.checkpoint().await?;
        let balance = self
            .ledger
            .get_balance(&self.settings.accounts.lotto)
            .await?;
        let transactions = self.fetch_new_transactions(checkpoint).await?;
        info!(
            "Cycle from ledger {}: balance {} XRP, {} new transactions",
            checkpoint,
            balance,
            transactions.len()
        );
        Ok(Cycle {
            balance,
            transactions,
        })
    }
    /// Ingests new deposits and pays out every pool that reached its
    /// threshold. Returns whether there are payments waiting for submission.
    pub async fn update(&self) -> Result<bool> {
        let mut cycle = self.begin_cycle().await?;
        self.classify(&cycle.transactions).await?;
        self.process_prizes(&mut cycle).await
    }
    pub async fn run_cycle(&self, submitter: &(dyn PaymentSubmitter + Send + Sync)) -> Result<()> {
        if self.update().await? {
            let pending = self.db.get_payments(PaymentStatus::Pending).await?;
            submitter.submit(&pending).await?;
        }
        self.check_payments().await
    }
    pub async fn pool_status(&self) -> Result<Vec<PoolStatus>> {
        let mut status = vec![];
        for pool in &self.settings.parameters.pools {
            let participants = self.db.get_participants(Some(*pool)).await?;
            let balance: Decimal = participants.iter().map(|p| p.amount).sum();
            status.push(PoolStatus {
                pool: *pool,
                participants: participants.len(),
                balance,
                percent: (balance * Decimal::ONE_HUNDRED / Decimal::from(*pool)).round_dp(2),
            });
        }
        Ok(status)
    }
    /// Ledger balance above the reserve floor.
    pub async fn available_balance(&self) -> Result<Decimal> {
        let balance = self
            .ledger
            .get_balance(&self.settings.accounts.lotto)
            .await?;
        Ok(balance - self.settings.parameters.reserved_balance)
    }
    /// Runs `job` under the lock file. Any failure, a lock left behind by an
    /// earlier run included, reaches the operator. The lock then stays.
    pub async fn locked<F>(&self, what: &str, job: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let path = &self.settings.lock_file;
        let lock = match LockFile::acquire(path).await {
            Ok(lock) => lock,
            Err(e) => return Err(self.fatal(&format!("{} refused", what), e).await),
        };
        if let Err(e) = job.await {
            let context = format!("{} failed, {} left in place", what, path.display());
            return Err(self.fatal(&context, e).await);
        }
        if let Err(e) = lock.release().await {
            return Err(self.fatal(&format!("{} done but still locked", what), e).await);
        }
        Ok(())
    }
    /// Reports `e` on the operator channel and hands it back.
    async fn fatal(&self, context: &str, e: anyhow::Error) -> anyhow::Error {
        if let Err(alert) = self.notifier.alert(&format!("{}: {:#}", context, e)).await {
            error!("Couldn't alert the operator: {:#}", alert);
        }
        e
    }
    pub async fn close(&self) {
        self.db.close().await;
    }
}
