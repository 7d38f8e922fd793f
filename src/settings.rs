use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::model::{Address, LedgerIndex, PoolTag};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: String,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    pub ledger: LedgerSettings,
    pub accounts: Accounts,
    pub parameters: Parameters,
    pub submitter: SubmitterSettings,
}
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    pub url: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}
#[derive(Debug, Clone, Deserialize)]
pub struct Accounts {
    pub lotto: Address,
    pub fees: Address,
    /// Charity name to address.
    pub donations: BTreeMap<String, Address>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct Parameters {
    /// Pool thresholds in whole XRP, each doubling as its destination tag.
    /// The last pool catches deposits without a known tag.
    pub pools: Vec<PoolTag>,
    #[serde(default)]
    pub reserved_tags: Vec<u32>,
    pub max_participation_ratio: Decimal,
    pub platform_fee_ratio: Decimal,
    pub donation_fee_ratio: Decimal,
    pub reserved_balance: Decimal,
    #[serde(default = "default_start_from_ledger")]
    pub start_from_ledger: LedgerIndex,
    #[serde(default)]
    pub notify: bool,
}
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitterSettings {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("ZerpLottoLock")
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_page_limit() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_start_from_ledger() -> LedgerIndex {
    -1
}

impl Settings {
    /// Loads the settings file and applies `LOTTO__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("LOTTO").separator("__"))
            .build()
            .with_context(|| format!("couldn't read settings from {}", path))?
            .try_deserialize()
            .context("invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }
    pub fn validate(&self) -> Result<()> {
        let p = &self.parameters;
        if p.pools.is_empty() {
            bail!("at least one pool has to be configured");
        }
        if p.pools.contains(&0) {
            bail!("pool thresholds have to be positive");
        }
        if self.accounts.donations.is_empty() {
            bail!("at least one donation account has to be configured");
        }
        for (name, ratio) in [
            ("max_participation_ratio", p.max_participation_ratio),
            ("platform_fee_ratio", p.platform_fee_ratio),
            ("donation_fee_ratio", p.donation_fee_ratio),
        ] {
            if ratio < Decimal::ZERO || ratio > Decimal::ONE {
                bail!("{} was {} but needs to be between 0 and 1", name, ratio);
            }
        }
        if p.platform_fee_ratio + p.donation_fee_ratio >= Decimal::ONE {
            bail!("fees and donations would take the whole prize");
        }
        if p.reserved_balance < Decimal::ZERO {
            bail!("reserved_balance can't be negative");
        }
        if self.ledger.page_limit == 0 {
            bail!("ledger.page_limit has to be positive");
        }
        Ok(())
    }
    /// Deposits without a known tag land in the last configured pool.
    pub fn default_pool(&self) -> PoolTag {
        self.parameters.pools.last().copied().unwrap_or_default()
    }
}

#[cfg(test)]
pub fn test_settings() -> Settings {
    use rust_decimal_macros::dec;
    Settings {
        database: "sqlite::memory:".into(),
        lock_file: default_lock_file(),
        backup_dir: default_backup_dir(),
        ledger: LedgerSettings {
            url: "http://127.0.0.1:5005".into(),
            page_limit: 100,
            timeout_secs: 30,
        },
        accounts: Accounts {
            lotto: "rLotto".into(),
            fees: "rFees".into(),
            donations: BTreeMap::from([("charity".to_string(), "rCharity".to_string())]),
        },
        parameters: Parameters {
            pools: vec![10, 100],
            reserved_tags: vec![1],
            max_participation_ratio: dec!(0.5),
            platform_fee_ratio: dec!(0.03),
            donation_fee_ratio: dec!(0.02),
            reserved_balance: dec!(20),
            start_from_ledger: -1,
            notify: true,
        },
        submitter: SubmitterSettings {
            program: "true".into(),
            args: vec![],
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use config::FileFormat;
    use rust_decimal_macros::dec;

    const SETTINGS: &str = r#"
database = "lotto.db"

[ledger]
url = "https://s1.ripple.com:51234"

[accounts]
lotto = "rLotto"
fees = "rFees"

[accounts.donations]
water = "rWater"
school = "rSchool"

[parameters]
pools = [10, 100, 1000]
reserved_tags = [1, 2]
max_participation_ratio = 0.5
platform_fee_ratio = 0.03
donation_fee_ratio = 0.02
reserved_balance = 25

[submitter]
program = "/usr/bin/node"
args = ["./processPayments.js", "--testing=False"]
"#;

    fn parse(text: &str) -> Result<Settings> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    #[test]
    fn loads_with_defaults() {
        let settings = parse(SETTINGS).unwrap();
        assert_eq!(settings.default_pool(), 1000);
        assert_eq!(settings.ledger.page_limit, 100);
        assert_eq!(settings.parameters.start_from_ledger, -1);
        assert_eq!(settings.parameters.platform_fee_ratio, dec!(0.03));
        assert_eq!(settings.accounts.donations.len(), 2);
        assert_eq!(settings.lock_file, PathBuf::from("ZerpLottoLock"));
    }
    #[test]
    fn rejects_greedy_ratios() {
        let text = SETTINGS.replace("donation_fee_ratio = 0.02", "donation_fee_ratio = 0.97");
        assert!(parse(&text).is_err());
        let text = SETTINGS.replace("pools = [10, 100, 1000]", "pools = []");
        assert!(parse(&text).is_err());
    }
}
