use crate::error::LottoError;
use crate::ledger::LedgerTx;
use crate::lotto::Lotto;
use crate::model::LedgerIndex;
use anyhow::Result;
use log::{debug, trace, warn};
use std::collections::HashSet;

impl Lotto {
    /// Whole account history from `min_ledger` on, in ledger order, each
    /// transaction once.
    pub(crate) async fn fetch_transactions(&self, min_ledger: LedgerIndex) -> Result<Vec<LedgerTx>> {
        let account = &self.settings.accounts.lotto;
        let limit = self.settings.ledger.page_limit;
        let mut transactions: Vec<LedgerTx> = vec![];
        let mut min_ledger = min_ledger;
        loop {
            let mut page = self
                .ledger
                .get_account_transactions(account, min_ledger, limit)
                .await?;
            trace!("Page from ledger {} has {} transactions", min_ledger, page.len());
            if page.is_empty() {
                break;
            }
            let full = page.len() >= limit as usize;
            // pages overlap on the boundary ledger
            if let Some(last) = transactions.last() {
                if let Some(position) = page.iter().position(|tx| tx.hash == last.hash) {
                    page.drain(..=position);
                }
            }
            if page.is_empty() {
                if full {
                    warn!(
                        "Ledger {} holds more transactions than fit in a page of {}, \
                        later transactions are not visible",
                        min_ledger, limit
                    );
                }
                break;
            }
            if let Some(max) = page.iter().map(|tx| tx.ledger_index).max() {
                min_ledger = max;
            }
            transactions.extend(page);
        }
        if transactions.is_empty() {
            return Err(LottoError::Ingestion.into());
        }
        Ok(transactions)
    }
    /// Transactions after `checkpoint` that no previous cycle accounted for.
    pub async fn fetch_new_transactions(&self, checkpoint: LedgerIndex) -> Result<Vec<LedgerTx>> {
        let mut transactions = self.fetch_transactions(checkpoint).await?;
        if checkpoint == -1 {
            let activation = transactions.remove(0);
            debug!("Skipping account activation {}", activation.hash);
        }
        if let Some(prize) = self.db.get_last_prize().await? {
            if let Some(last) = prize.participant_txs.last() {
                if let Some(position) = transactions.iter().position(|tx| &tx.hash == last) {
                    debug!(
                        "Skipping {} transactions already in prize {}",
                        position + 1,
                        prize.id
                    );
                    transactions.drain(..=position);
                }
            }
        }
        // prizes of other pools may have folded transactions past that point
        let folded = self
            .db
            .get_prizes_since(checkpoint)
            .await?
            .into_iter()
            .flat_map(|prize| prize.participant_txs)
            .collect::<HashSet<_>>();
        transactions.retain(|tx| !folded.contains(&tx.hash));
        Ok(transactions)
    }
}
