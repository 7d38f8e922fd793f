use crate::error::LottoError;
use crate::model::Payment;
use crate::settings::SubmitterSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;

/// Hands pending payments to whatever signs and broadcasts them. A
/// successful submission leaves each payment with a tx id and
/// `SUCCESS_NOT_FINAL` status.
#[async_trait]
pub trait PaymentSubmitter {
    async fn submit(&self, payments: &[Payment]) -> Result<()>;
}

/// Runs the configured signing program. The program reads the payments from
/// the database itself; the ids it should process are passed in
/// `LOTTO_PENDING_PAYMENTS`.
#[derive(Debug, Clone)]
pub struct CommandSubmitter {
    program: String,
    args: Vec<String>,
    database: String,
}
impl CommandSubmitter {
    pub fn new(settings: &SubmitterSettings, database: String) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            database,
        }
    }
}
#[async_trait]
impl PaymentSubmitter for CommandSubmitter {
    async fn submit(&self, payments: &[Payment]) -> Result<()> {
        let ids = payments
            .iter()
            .map(|payment| payment.id.to_string())
            .collect::<Vec<_>>();
        info!(
            "Submitting {} payments through {}",
            payments.len(),
            self.program
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("LOTTO_DATABASE", &self.database)
            .env("LOTTO_PENDING_PAYMENTS", ids.join(","))
            .output()
            .await
            .with_context(|| format!("couldn't start {}", self.program))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("{} stdout:\n{}", self.program, stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            warn!("{} stderr:\n{}", self.program, stderr.trim_end());
        }
        if !output.status.success() {
            return Err(LottoError::PaymentSubmission(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ))
            .into());
        }
        Ok(())
    }
}
