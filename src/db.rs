use crate::memo::Memo;
use crate::model::*;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;

#[async_trait]
pub trait DB {
    async fn add_payment(
        &self,
        kind: PaymentType,
        destination: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<RowId>;
    async fn get_payment(&self, payment: RowId) -> Result<Payment>;
    async fn get_payments(&self, status: PaymentStatus) -> Result<Vec<Payment>>;
    async fn has_pending_payments(&self) -> Result<bool>;
    /// Submitted payments that haven't reached finality yet.
    async fn get_unfinalized_payments(&self) -> Result<Vec<Payment>>;
    async fn finalize_payment(
        &self,
        payment: RowId,
        amount: Decimal,
        ledger_index: LedgerIndex,
        date: DateTime<Utc>,
    ) -> Result<()>;
    /// Inserts or overwrites a payment read back from the ledger, matched on its tx id.
    async fn restore_payment(&self, payment: &Payment) -> Result<RowId>;
    #[cfg(test)]
    async fn set_payment_submitted(&self, payment: RowId, tx_id: &str) -> Result<()>;

    /// Inserts the disbursement or overwrites the one already linked to the
    /// same payment. `id` forces the row id, `None` lets the store pick one.
    async fn add_disbursement(
        &self,
        id: Option<RowId>,
        disbursement: &Disbursement,
    ) -> Result<RowId>;
    async fn get_disbursement(
        &self,
        kind: PaymentType,
        payment: RowId,
    ) -> Result<(RowId, Disbursement)>;
    async fn get_disbursements(&self, kind: PaymentType) -> Result<Vec<(RowId, Disbursement)>>;
    async fn set_disbursement_amount(
        &self,
        kind: PaymentType,
        payment: RowId,
        amount: Decimal,
    ) -> Result<()>;
    async fn devolution_exists(&self, received_tx: &str) -> Result<bool>;
    async fn get_last_prize(&self) -> Result<Option<PrizeSnapshot>>;
    /// Prizes that folded transactions from `ledger_index` or later.
    async fn get_prizes_since(&self, ledger_index: LedgerIndex) -> Result<Vec<PrizeSnapshot>>;
    async fn set_prize_participants(&self, prize: RowId, txs: &[TxHash]) -> Result<()>;
    /// Writes the prize with its fee and donation payments and removes the
    /// folded participants, all or nothing. Returns the prize id.
    async fn record_payout(&self, payout: &Payout) -> Result<RowId>;

    /// Returns false if a participant for the same tx already exists.
    async fn add_participant(&self, participant: &Participant) -> Result<bool>;
    async fn get_participants(&self, pool: Option<PoolTag>) -> Result<Vec<Participant>>;
    async fn delete_participants(&self, participants: &[RowId]) -> Result<()>;
    async fn get_last_participant_ledger(&self) -> Result<Option<LedgerIndex>>;

    /// Drops every table that can be rebuilt from the ledger alone.
    async fn clear_derived(&self) -> Result<()>;
    async fn backup(&self, path: &Path) -> Result<()>;
    async fn close(&self);
}
pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    /// Opens (and creates) the database file, or a private in-memory
    /// database when no path is given.
    pub async fn new(path: Option<String>) -> Result<Self> {
        let connection = match path {
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true);
                SqlitePoolOptions::new()
                    .connect_with(options)
                    .await
                    .with_context(|| format!("couldn't open database {}", path))?
            }
            None => {
                // every connection to :memory: is its own database
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                    .await?
            }
        };
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS payments (\
                id INTEGER PRIMARY KEY,\
                kind TEXT NOT NULL,\
                status TEXT NOT NULL,\
                destination TEXT NOT NULL,\
                amount TEXT NOT NULL,\
                tx_id TEXT UNIQUE,\
                ledger_index INTEGER,\
                date INTEGER,\
                memo TEXT NOT NULL DEFAULT ''\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS prizes (\
                id INTEGER PRIMARY KEY,\
                payment_id INTEGER NOT NULL UNIQUE,\
                destination TEXT NOT NULL,\
                amount TEXT NOT NULL,\
                winner_tx TEXT NOT NULL,\
                participant_txs TEXT NOT NULL,\
                last_included_ledger INTEGER NOT NULL\
                )",
            )
            .await?;
        for table in ["fees", "donations"] {
            connection
                .execute(
                    format!(
                        "CREATE TABLE IF NOT EXISTS {} (\
                        id INTEGER PRIMARY KEY,\
                        payment_id INTEGER NOT NULL UNIQUE,\
                        destination TEXT NOT NULL,\
                        amount TEXT NOT NULL,\
                        prize_id INTEGER NOT NULL\
                        )",
                        table
                    )
                    .as_str(),
                )
                .await?;
        }
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS devolutions (\
                id INTEGER PRIMARY KEY,\
                payment_id INTEGER NOT NULL UNIQUE,\
                destination TEXT NOT NULL,\
                amount TEXT NOT NULL,\
                received_tx TEXT NOT NULL\
                )",
            )
            .await?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS participants (\
                id INTEGER PRIMARY KEY,\
                address TEXT NOT NULL,\
                amount TEXT NOT NULL,\
                pool INTEGER NOT NULL,\
                tx_id TEXT NOT NULL UNIQUE,\
                ledger_index INTEGER NOT NULL,\
                date INTEGER NOT NULL\
                )",
            )
            .await?;
        Ok(Self { connection })
    }
}

fn table(kind: PaymentType) -> &'static str {
    match kind {
        PaymentType::Prize => "prizes",
        PaymentType::Fee => "fees",
        PaymentType::Donation => "donations",
        PaymentType::Devolution => "devolutions",
    }
}
fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).with_context(|| format!("invalid amount {} in {}", text, column))
}
fn timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(anyhow!("invalid timestamp {}", seconds))
}
fn payment_from_row(row: &SqliteRow) -> Result<Payment> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let date: Option<i64> = row.try_get("date")?;
    Ok(Payment {
        id: row.try_get("id")?,
        kind: PaymentType::from_str(&kind)?,
        status: PaymentStatus::from_str(&status)?,
        destination: row.try_get("destination")?,
        amount: decimal(row, "amount")?,
        tx_id: row.try_get("tx_id")?,
        ledger_index: row.try_get("ledger_index")?,
        date: date.map(timestamp).transpose()?,
        memo: row.try_get("memo")?,
    })
}
fn disbursement_from_row(kind: PaymentType, row: &SqliteRow) -> Result<(RowId, Disbursement)> {
    let details = match kind {
        PaymentType::Prize => {
            let txs: String = row.try_get("participant_txs")?;
            DisbursementDetails::Prize {
                winner_tx: row.try_get("winner_tx")?,
                participant_txs: split_txs(&txs),
                last_included_ledger: row.try_get("last_included_ledger")?,
            }
        }
        PaymentType::Fee => DisbursementDetails::Fee {
            prize_id: row.try_get("prize_id")?,
        },
        PaymentType::Donation => DisbursementDetails::Donation {
            prize_id: row.try_get("prize_id")?,
        },
        PaymentType::Devolution => DisbursementDetails::Devolution {
            received_tx: row.try_get("received_tx")?,
        },
    };
    Ok((
        row.try_get("id")?,
        Disbursement {
            payment_id: row.try_get("payment_id")?,
            destination: row.try_get("destination")?,
            amount: decimal(row, "amount")?,
            details,
        },
    ))
}
fn snapshot_from_row(row: &SqliteRow) -> Result<PrizeSnapshot> {
    let txs: String = row.try_get("participant_txs")?;
    Ok(PrizeSnapshot {
        id: row.try_get("id")?,
        participant_txs: split_txs(&txs),
        last_included_ledger: row.try_get("last_included_ledger")?,
    })
}
fn participant_from_row(row: &SqliteRow) -> Result<Participant> {
    let pool: i64 = row.try_get("pool")?;
    Ok(Participant {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        amount: decimal(row, "amount")?,
        pool: pool.try_into()?,
        tx_id: row.try_get("tx_id")?,
        ledger_index: row.try_get("ledger_index")?,
        date: timestamp(row.try_get("date")?)?,
    })
}

async fn insert_payment(
    conn: &mut SqliteConnection,
    kind: PaymentType,
    destination: &str,
    amount: Decimal,
    memo: &str,
) -> Result<RowId> {
    let id = query(
        "INSERT INTO payments (\
        kind,\
        status,\
        destination,\
        amount,\
        memo)\
        VALUES (?,?,?,?,?)",
    )
    .bind(kind.to_string())
    .bind(PaymentStatus::Pending.to_string())
    .bind(destination)
    .bind(amount.to_string())
    .bind(memo)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}
async fn insert_disbursement(
    conn: &mut SqliteConnection,
    id: Option<RowId>,
    disbursement: &Disbursement,
) -> Result<RowId> {
    let stmt = match &disbursement.details {
        DisbursementDetails::Prize {
            winner_tx,
            participant_txs,
            last_included_ledger,
        } => query(
            "INSERT INTO prizes (\
            id,\
            payment_id,\
            destination,\
            amount,\
            winner_tx,\
            participant_txs,\
            last_included_ledger)\
            VALUES (?,?,?,?,?,?,?) \
            ON CONFLICT(payment_id) DO UPDATE SET \
            destination = excluded.destination,\
            amount = excluded.amount,\
            winner_tx = excluded.winner_tx,\
            participant_txs = excluded.participant_txs,\
            last_included_ledger = excluded.last_included_ledger \
            RETURNING id",
        )
        .bind(id)
        .bind(disbursement.payment_id)
        .bind(disbursement.destination.as_str())
        .bind(disbursement.amount.to_string())
        .bind(winner_tx.as_str())
        .bind(join_txs(participant_txs))
        .bind(last_included_ledger),
        DisbursementDetails::Fee { prize_id } | DisbursementDetails::Donation { prize_id } => {
            let sql = match disbursement.details.kind() {
                PaymentType::Fee => {
                    "INSERT INTO fees (id, payment_id, destination, amount, prize_id) \
                    VALUES (?,?,?,?,?) \
                    ON CONFLICT(payment_id) DO UPDATE SET \
                    destination = excluded.destination,\
                    amount = excluded.amount,\
                    prize_id = excluded.prize_id \
                    RETURNING id"
                }
                _ => {
                    "INSERT INTO donations (id, payment_id, destination, amount, prize_id) \
                    VALUES (?,?,?,?,?) \
                    ON CONFLICT(payment_id) DO UPDATE SET \
                    destination = excluded.destination,\
                    amount = excluded.amount,\
                    prize_id = excluded.prize_id \
                    RETURNING id"
                }
            };
            query(sql)
                .bind(id)
                .bind(disbursement.payment_id)
                .bind(disbursement.destination.as_str())
                .bind(disbursement.amount.to_string())
                .bind(prize_id)
        }
        DisbursementDetails::Devolution { received_tx } => query(
            "INSERT INTO devolutions (\
            id,\
            payment_id,\
            destination,\
            amount,\
            received_tx)\
            VALUES (?,?,?,?,?) \
            ON CONFLICT(payment_id) DO UPDATE SET \
            destination = excluded.destination,\
            amount = excluded.amount,\
            received_tx = excluded.received_tx \
            RETURNING id",
        )
        .bind(id)
        .bind(disbursement.payment_id)
        .bind(disbursement.destination.as_str())
        .bind(disbursement.amount.to_string())
        .bind(received_tx.as_str()),
    };
    let row = stmt.fetch_one(&mut *conn).await.with_context(|| {
        format!(
            "couldn't store {} for payment {}",
            disbursement.details.kind(),
            disbursement.payment_id
        )
    })?;
    Ok(row.try_get("id")?)
}
async fn delete_participant_rows(conn: &mut SqliteConnection, ids: &[RowId]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM participants WHERE id IN (");
    let mut separated = builder.separated(",");
    for id in ids {
        separated.push_bind(*id);
    }
    builder.push(")");
    builder.build().execute(&mut *conn).await?;
    Ok(())
}

#[async_trait]
impl DB for SQLite {
    async fn add_payment(
        &self,
        kind: PaymentType,
        destination: &str,
        amount: Decimal,
        memo: &str,
    ) -> Result<RowId> {
        let mut conn = self.connection.acquire().await?;
        insert_payment(&mut conn, kind, destination, amount, memo).await
    }
    async fn get_payment(&self, payment: RowId) -> Result<Payment> {
        let row = self
            .connection
            .fetch_one(query("SELECT * FROM payments WHERE id = ?").bind(payment))
            .await
            .with_context(|| format!("couldn't get payment {}", payment))?;
        payment_from_row(&row)
    }
    async fn get_payments(&self, status: PaymentStatus) -> Result<Vec<Payment>> {
        let rows = self
            .connection
            .fetch_all(
                query("SELECT * FROM payments WHERE status = ? ORDER BY id")
                    .bind(status.to_string()),
            )
            .await?;
        rows.iter().map(payment_from_row).collect()
    }
    async fn has_pending_payments(&self) -> Result<bool> {
        let row = self
            .connection
            .fetch_one(
                query("SELECT EXISTS(SELECT 1 FROM payments WHERE status = ?)")
                    .bind(PaymentStatus::Pending.to_string()),
            )
            .await?;
        Ok(row.try_get(0)?)
    }
    async fn get_unfinalized_payments(&self) -> Result<Vec<Payment>> {
        let rows = self
            .connection
            .fetch_all(
                query(
                    "SELECT * FROM payments \
                    WHERE status = ? AND tx_id IS NOT NULL \
                    ORDER BY id",
                )
                .bind(PaymentStatus::SuccessNotFinal.to_string()),
            )
            .await?;
        rows.iter().map(payment_from_row).collect()
    }
    async fn finalize_payment(
        &self,
        payment: RowId,
        amount: Decimal,
        ledger_index: LedgerIndex,
        date: DateTime<Utc>,
    ) -> Result<()> {
        self.connection
            .execute(
                query(
                    "UPDATE payments SET \
                    status = ?,\
                    amount = ?,\
                    ledger_index = ?,\
                    date = ? \
                    WHERE id = ?",
                )
                .bind(PaymentStatus::SuccessFinal.to_string())
                .bind(amount.to_string())
                .bind(ledger_index)
                .bind(date.timestamp())
                .bind(payment),
            )
            .await?;
        Ok(())
    }
    async fn restore_payment(&self, payment: &Payment) -> Result<RowId> {
        let row = self
            .connection
            .fetch_one(
                query(
                    "INSERT INTO payments (\
                    kind,\
                    status,\
                    destination,\
                    amount,\
                    tx_id,\
                    ledger_index,\
                    date,\
                    memo)\
                    VALUES (?,?,?,?,?,?,?,?) \
                    ON CONFLICT(tx_id) DO UPDATE SET \
                    kind = excluded.kind,\
                    status = excluded.status,\
                    destination = excluded.destination,\
                    amount = excluded.amount,\
                    ledger_index = excluded.ledger_index,\
                    date = excluded.date,\
                    memo = excluded.memo \
                    RETURNING id",
                )
                .bind(payment.kind.to_string())
                .bind(payment.status.to_string())
                .bind(payment.destination.as_str())
                .bind(payment.amount.to_string())
                .bind(payment.tx_id.as_deref())
                .bind(payment.ledger_index)
                .bind(payment.date.map(|date| date.timestamp()))
                .bind(payment.memo.as_str()),
            )
            .await?;
        Ok(row.try_get("id")?)
    }
    #[cfg(test)]
    async fn set_payment_submitted(&self, payment: RowId, tx_id: &str) -> Result<()> {
        self.connection
            .execute(
                query("UPDATE payments SET tx_id = ?, status = ? WHERE id = ?")
                    .bind(tx_id)
                    .bind(PaymentStatus::SuccessNotFinal.to_string())
                    .bind(payment),
            )
            .await?;
        Ok(())
    }
    async fn add_disbursement(
        &self,
        id: Option<RowId>,
        disbursement: &Disbursement,
    ) -> Result<RowId> {
        let mut conn = self.connection.acquire().await?;
        insert_disbursement(&mut conn, id, disbursement).await
    }
    async fn get_disbursement(
        &self,
        kind: PaymentType,
        payment: RowId,
    ) -> Result<(RowId, Disbursement)> {
        let sql = format!("SELECT * FROM {} WHERE payment_id = ?", table(kind));
        let row = self
            .connection
            .fetch_one(query(sql.as_str()).bind(payment))
            .await
            .with_context(|| format!("no {} row for payment {}", kind, payment))?;
        disbursement_from_row(kind, &row)
    }
    async fn get_disbursements(&self, kind: PaymentType) -> Result<Vec<(RowId, Disbursement)>> {
        let sql = format!("SELECT * FROM {} ORDER BY id", table(kind));
        let rows = self.connection.fetch_all(query(sql.as_str())).await?;
        rows.iter()
            .map(|row| disbursement_from_row(kind, row))
            .collect()
    }
    async fn set_disbursement_amount(
        &self,
        kind: PaymentType,
        payment: RowId,
        amount: Decimal,
    ) -> Result<()> {
        let sql = format!("UPDATE {} SET amount = ? WHERE payment_id = ?", table(kind));
        self.connection
            .execute(query(sql.as_str()).bind(amount.to_string()).bind(payment))
            .await?;
        Ok(())
    }
    async fn devolution_exists(&self, received_tx: &str) -> Result<bool> {
        let row = self
            .connection
            .fetch_one(
                query("SELECT EXISTS(SELECT 1 FROM devolutions WHERE received_tx = ?)")
                    .bind(received_tx),
            )
            .await?;
        Ok(row.try_get(0)?)
    }
    async fn get_last_prize(&self) -> Result<Option<PrizeSnapshot>> {
        let row = self
            .connection
            .fetch_optional(query(
                "SELECT id, participant_txs, last_included_ledger \
                FROM prizes ORDER BY id DESC LIMIT 1",
            ))
            .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }
    async fn get_prizes_since(&self, ledger_index: LedgerIndex) -> Result<Vec<PrizeSnapshot>> {
        let rows = self
            .connection
            .fetch_all(
                query(
                    "SELECT id, participant_txs, last_included_ledger \
                    FROM prizes WHERE last_included_ledger >= ? ORDER BY id",
                )
                .bind(ledger_index),
            )
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }
    async fn set_prize_participants(&self, prize: RowId, txs: &[TxHash]) -> Result<()> {
        self.connection
            .execute(
                query("UPDATE prizes SET participant_txs = ? WHERE id = ?")
                    .bind(join_txs(txs))
                    .bind(prize),
            )
            .await?;
        Ok(())
    }
    async fn record_payout(&self, payout: &Payout) -> Result<RowId> {
        let (winner_tx, first, last) = match &payout.details {
            DisbursementDetails::Prize {
                winner_tx,
                participant_txs,
                ..
            } => match (participant_txs.first(), participant_txs.last()) {
                (Some(first), Some(last)) => (winner_tx, first, last),
                _ => bail!("prize for {} has no participants", payout.destination),
            },
            other => bail!("{} can't be recorded as a prize", other.kind()),
        };
        let mut tx = self.connection.begin().await?;
        let payment = insert_payment(
            &mut tx,
            PaymentType::Prize,
            &payout.destination,
            payout.amount,
            "",
        )
        .await?;
        let prize = insert_disbursement(
            &mut tx,
            None,
            &Disbursement {
                payment_id: payment,
                destination: payout.destination.clone(),
                amount: payout.amount,
                details: payout.details.clone(),
            },
        )
        .await?;
        let memo = Memo::Prize {
            prize_id: prize,
            first_included_tx: first.clone(),
            last_included_tx: last.clone(),
            winner_tx: winner_tx.clone(),
        };
        query("UPDATE payments SET memo = ? WHERE id = ?")
            .bind(memo.to_string())
            .bind(payment)
            .execute(&mut *tx)
            .await?;
        for share in &payout.shares {
            let (details, memo) = match share.kind {
                PaymentType::Fee => (
                    DisbursementDetails::Fee { prize_id: prize },
                    Memo::Fee { prize_id: prize },
                ),
                PaymentType::Donation => (
                    DisbursementDetails::Donation { prize_id: prize },
                    Memo::Donation { prize_id: prize },
                ),
                kind => bail!("a {} can't be taken out of a prize", kind),
            };
            let payment = insert_payment(
                &mut tx,
                share.kind,
                &share.destination,
                share.amount,
                &memo.to_string(),
            )
            .await?;
            insert_disbursement(
                &mut tx,
                None,
                &Disbursement {
                    payment_id: payment,
                    destination: share.destination.clone(),
                    amount: share.amount,
                    details,
                },
            )
            .await?;
        }
        delete_participant_rows(&mut tx, &payout.folded).await?;
        tx.commit().await?;
        Ok(prize)
    }
    async fn add_participant(&self, participant: &Participant) -> Result<bool> {
        let result = self
            .connection
            .execute(
                query(
                    "INSERT OR IGNORE INTO participants (\
                    address,\
                    amount,\
                    pool,\
                    tx_id,\
                    ledger_index,\
                    date)\
                    VALUES (?,?,?,?,?,?)",
                )
                .bind(participant.address.as_str())
                .bind(participant.amount.to_string())
                .bind(participant.pool)
                .bind(participant.tx_id.as_str())
                .bind(participant.ledger_index)
                .bind(participant.date.timestamp()),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }
    async fn get_participants(&self, pool: Option<PoolTag>) -> Result<Vec<Participant>> {
        let rows = match pool {
            Some(pool) => {
                self.connection
                    .fetch_all(
                        query("SELECT * FROM participants WHERE pool = ? ORDER BY id").bind(pool),
                    )
                    .await?
            }
            None => {
                self.connection
                    .fetch_all(query("SELECT * FROM participants ORDER BY id"))
                    .await?
            }
        };
        rows.iter().map(participant_from_row).collect()
    }
    async fn delete_participants(&self, participants: &[RowId]) -> Result<()> {
        let mut conn = self.connection.acquire().await?;
        delete_participant_rows(&mut conn, participants).await
    }
    async fn get_last_participant_ledger(&self) -> Result<Option<LedgerIndex>> {
        let row = self
            .connection
            .fetch_optional(query(
                "SELECT ledger_index FROM participants ORDER BY id DESC LIMIT 1",
            ))
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("ledger_index")?),
            None => None,
        })
    }
    async fn clear_derived(&self) -> Result<()> {
        for table in ["prizes", "fees", "devolutions", "participants"] {
            self.connection
                .execute(format!("DELETE FROM {}", table).as_str())
                .await?;
        }
        Ok(())
    }
    async fn backup(&self, path: &Path) -> Result<()> {
        let path = path
            .to_str()
            .ok_or(anyhow!("backup path {} isn't valid utf-8", path.display()))?;
        self.connection
            .execute(query("VACUUM INTO ?").bind(path))
            .await
            .with_context(|| format!("couldn't back up database to {}", path))?;
        Ok(())
    }
    async fn close(&self) {
        self.connection.close().await;
    }
}
