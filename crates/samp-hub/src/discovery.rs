//! Lock-record lifecycle: the on-disk record through which local
//! clients find a running hub.
//!
//! The record moves through absent → published → withdrawn (or
//! overwritten by a newer hub once stale). Publishing probes any
//! existing record first; withdrawal deletes only a record this hub
//! still owns.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::fs;

use samp_core::{HubError, LockInfo};

/// Filename of the lock record inside the user's home directory.
const LOCKFILE_NAME: &str = ".samp";

/// Manages discovery lock records on disk.
pub struct DiscoveryService {
    http: reqwest::Client,
}

impl DiscoveryService {
    /// `probe_timeout` bounds the liveness probe of a pre-existing
    /// record; a hub that cannot answer within it is treated as dead.
    pub fn new(probe_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(probe_timeout)
            .no_proxy()
            .build()
            .context("building discovery probe client")?;
        Ok(Self { http })
    }

    /// The conventional per-user record location.
    pub fn default_lockfile_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(LOCKFILE_NAME))
    }

    /// Pings the hub a record advertises. Any failure — unreadable
    /// address, connection refused, timeout, non-success status — means
    /// the record is stale.
    pub async fn is_hub_alive(&self, info: &LockInfo) -> bool {
        let endpoint = match url::Url::parse(&info.url).and_then(|base| base.join("ping")) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::warn!(url = %info.url, error = %err, "lock record advertises unusable url");
                return false;
            }
        };
        match self.http.get(endpoint).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(url = %info.url, error = %err, "liveness probe failed");
                false
            }
        }
    }

    /// Publishes `info` at `path`.
    ///
    /// An existing record is probed first: if its hub still answers,
    /// publication fails with [`HubError::HubAlreadyRunning`]; if it is
    /// unreadable or its hub is gone, the record is overwritten with a
    /// warning. The new record is written with owner-only permissions
    /// where the platform supports them.
    pub async fn publish(&self, info: &LockInfo, path: &Path) -> Result<()> {
        if let Ok(contents) = fs::read_to_string(path).await {
            match LockInfo::parse(&contents) {
                Ok(existing) => {
                    if self.is_hub_alive(&existing).await {
                        return Err(anyhow::Error::new(HubError::HubAlreadyRunning(
                            existing.url,
                        )));
                    }
                    tracing::warn!(
                        path = %path.display(),
                        "overwriting lock record of apparently dead hub"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "overwriting unreadable lock record"
                    );
                }
            }
        }

        let rendered = info
            .to_file_string(SystemTime::now())
            .map_err(anyhow::Error::new)?;
        fs::write(path, rendered)
            .await
            .with_context(|| format!("writing lock record to {}", path.display()))?;
        restrict_permissions(path).await;
        tracing::info!(path = %path.display(), url = %info.url, "lock record published");
        Ok(())
    }

    /// Withdraws the record at `path`, but only if its secret still
    /// matches `secret` — a mismatch means another hub has taken over
    /// the path since, and its record is left untouched.
    ///
    /// Never fatal; returns whether the record was deleted.
    pub async fn withdraw(&self, path: &Path, secret: &str) -> bool {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "lock record has disappeared");
                return false;
            }
        };
        match LockInfo::parse(&contents) {
            Ok(existing) if existing.secret == secret => match fs::remove_file(path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "lock record withdrawn");
                    true
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to delete lock record");
                    false
                }
            },
            Ok(_) => {
                tracing::warn!(
                    path = %path.display(),
                    "lock record has been overwritten by another hub; not deleting"
                );
                false
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "lock record unreadable; not deleting");
                false
            }
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let permissions = std::fs::Permissions::from_mode(0o600);
    if let Err(err) = fs::set_permissions(path, permissions).await {
        tracing::warn!(
            path = %path.display(),
            error = %err,
            "failed to restrict lock record to user-only access"
        );
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}
