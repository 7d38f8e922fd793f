use crate::error::LottoError;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Marker file that keeps two runs from touching the database at once.
/// It is only removed by [`LockFile::release`]; a run that fails leaves it
/// behind until an operator unlocks.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}
impl LockFile {
    pub async fn acquire(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LottoError::Locked(path.to_path_buf()).into())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("couldn't create {}", path.display()))
            }
        };
        file.write_all(format!("{} {}\n", std::process::id(), Utc::now().to_rfc3339()).as_bytes())
            .await?;
        debug!("Locked {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
    pub async fn release(self) -> Result<()> {
        fs::remove_file(&self.path)
            .await
            .with_context(|| format!("couldn't remove {}", self.path.display()))?;
        debug!("Unlocked {}", self.path.display());
        Ok(())
    }
    /// Removes a lock left behind by another run. Returns false if there was
    /// none.
    pub async fn force_unlock(path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!("Removed lock {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("couldn't remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn excludes_second_run() {
        let path = std::env::temp_dir().join(format!("zerplotto-lock-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let lock = LockFile::acquire(&path).await.unwrap();
        let err = LockFile::acquire(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LottoError>(),
            Some(LottoError::Locked(_))
        ));
        lock.release().await.unwrap();
        assert!(!path.exists());
        LockFile::acquire(&path).await.unwrap();
        assert!(LockFile::force_unlock(&path).await.unwrap());
        assert!(!LockFile::force_unlock(&path).await.unwrap());
    }
}
