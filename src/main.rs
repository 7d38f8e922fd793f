use crate::db::SQLite;
use crate::lock::LockFile;
use crate::lotto::Lotto;
use crate::model::{PaymentStatus, PaymentType};
use crate::notify::{LogNotifier, Notifier};
use crate::settings::Settings;
use crate::submitter::CommandSubmitter;
use crate::xrpl::XrplLedger;
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use env_logger::{Builder, WriteStyle};
use log::{error, info, LevelFilter};
use rust_decimal::Decimal;
use std::time::Duration;

mod classify;
mod db;
mod error;
mod finalize;
mod ingest;
mod ledger;
mod lock;
mod lotto;
mod memo;
mod model;
mod notify;
mod prize;
mod rebuild;
mod settings;
mod submitter;
mod xrpl;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "lotto.toml")]
    config: String,
    #[arg(short, long)]
    verbose: bool,
}
#[derive(Subcommand)]
enum Commands {
    /// Ingest, pay out full pools, submit and finalize payments.
    Run,
    /// Recreate prizes, fees, donations, devolutions and participants from the ledger.
    Rebuild,
    /// Participants and accumulated amount per pool.
    Status,
    /// Ledger balance above the reserve.
    Balance,
    /// Payments waiting for submission.
    Pending,
    Prizes,
    Lock,
    Unlock,
    /// Snapshot the database into the backup directory.
    Backup,
}

/// Reports a failure that happens before the lotto is up.
async fn startup_failed(e: anyhow::Error) -> anyhow::Error {
    if let Err(alert) = LogNotifier.alert(&format!("startup failed: {:#}", e)).await {
        error!("Couldn't alert the operator: {:#}", alert);
    }
    e
}

async fn open(settings: &Settings) -> Result<Lotto> {
    let db = SQLite::new(Some(settings.database.clone())).await?;
    let ledger = XrplLedger::new(
        settings.ledger.url.clone(),
        Duration::from_secs(settings.ledger.timeout_secs),
    )?;
    Ok(Lotto::new(
        Box::new(db),
        Box::new(ledger),
        Box::new(LogNotifier),
        settings.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    Builder::default()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .write_style(WriteStyle::Always)
        .init();
    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => return Err(startup_failed(e).await),
    };

    match cli.command {
        Commands::Lock => {
            LockFile::acquire(&settings.lock_file).await?;
            info!("Locked {}", settings.lock_file.display());
            return Ok(());
        }
        Commands::Unlock => {
            if !LockFile::force_unlock(&settings.lock_file).await? {
                info!("{} wasn't locked", settings.lock_file.display());
            }
            return Ok(());
        }
        _ => {}
    }

    let lotto = match open(&settings).await {
        Ok(lotto) => lotto,
        Err(e) => return Err(startup_failed(e).await),
    };
    let result = execute(&lotto, &settings, cli.command).await;
    lotto.close().await;
    result
}

async fn execute(lotto: &Lotto, settings: &Settings, command: Commands) -> Result<()> {
    match command {
        Commands::Run => {
            let submitter = CommandSubmitter::new(&settings.submitter, settings.database.clone());
            lotto.locked("Cycle", lotto.run_cycle(&submitter)).await
        }
        Commands::Rebuild => lotto.locked("Rebuild", lotto.rebuild_from_ledger()).await,
        Commands::Status => status(lotto).await,
        Commands::Balance => {
            let balance = lotto.available_balance().await?;
            println!("{} XRP available", balance);
            Ok(())
        }
        Commands::Pending => {
            for payment in lotto.db.get_payments(PaymentStatus::Pending).await? {
                println!(
                    "{} {} {} XRP to {} {}",
                    payment.id, payment.kind, payment.amount, payment.destination, payment.memo
                );
            }
            Ok(())
        }
        Commands::Prizes => {
            for (id, prize) in lotto.db.get_disbursements(PaymentType::Prize).await? {
                println!("{} {}", id, prize);
            }
            Ok(())
        }
        Commands::Backup => {
            let path = settings
                .backup_dir
                .join(format!("lotto-{}.db", Utc::now().format("%Y%m%d%H%M%S")));
            lotto.db.backup(&path).await?;
            info!("Backed up to {}", path.display());
            Ok(())
        }
        Commands::Lock | Commands::Unlock => Ok(()),
    }
}

async fn status(lotto: &Lotto) -> Result<()> {
    let mut played = Decimal::ZERO;
    for pool in lotto.pool_status().await? {
        println!(
            "pool {:>6}: {:>4} participants, {:>12} XRP ({}%)",
            pool.pool, pool.participants, pool.balance, pool.percent
        );
        played += pool.balance;
    }
    println!("total played: {} XRP", played);
    Ok(())
}
