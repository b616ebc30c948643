//! Credential file store
//!
//! Persists issued credentials so a restarted gateway can pick up a refresh
//! token without repeating the authorization handshake. Writes are atomic.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::credential::IssuedCredential;

/// JSON file holding the most recently issued credential
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the platform config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("dropcache")
            .join("credential.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential, `None` if nothing has been stored yet
    pub fn load(&self) -> Result<Option<IssuedCredential>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file: {:?}", self.path))?;
        let issued: IssuedCredential = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse credential file: {:?}", self.path))?;

        debug!(path = %self.path.display(), "Loaded stored credential");
        Ok(Some(issued))
    }

    /// Replace the stored credential
    ///
    /// The temp file is created with owner-only permissions and renamed over
    /// the target, so readers never see a partial file.
    pub fn save(&self, issued: &IssuedCredential) -> Result<()> {
        let parent = self.path.parent().unwrap_or(Path::new("/tmp"));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create credential directory: {:?}", parent))?;

        let json = serde_json::to_vec_pretty(issued).context("Failed to encode credential")?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temp file for credential")?;
        tmp.write_all(&json)
            .context("Failed to write credential file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to persist credential file: {:?}", self.path))?;

        info!(path = %self.path.display(), "Stored issued credential");
        Ok(())
    }

    /// Persist every credential published on `issued` until the channel closes
    pub fn spawn_persister(
        self,
        mut issued: broadcast::Receiver<IssuedCredential>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match issued.recv().await {
                    Ok(credential) => {
                        if let Err(e) = self.save(&credential) {
                            warn!(error = %e, "Failed to store issued credential");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Missed issued credentials, keeping the latest");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
