//! AWS MFA Profile Updater
//!
//! Drives one refresh of the MFA-protected session profile:
//!
//! 1. Load the credentials file into a [`CredentialsStore`] (a missing file is empty)
//! 2. Stop early while the target profile's `aws_session_expiration` lies in the future
//! 3. Obtain an OTP code and exchange it for session credentials
//! 4. Merge the credentials into the target profile, leaving every other profile alone
//! 5. Back up the previous file and write the new one readable by the owner only
//!
//! ## File Format
//!
//! Long-term credentials stay in the source profile, the session goes to `<profile>-mfa`:
//!
//! ```ini
//! [default]
//! aws_access_key_id = AKIA...
//! aws_secret_access_key = ...
//!
//! [default-mfa]
//! aws_access_key_id = ASIA...
//! aws_secret_access_key = ...
//! aws_session_token = ...
//! aws_session_expiration = 2026-10-18 21:04:05+0000
//! ```

use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, FixedOffset, Local, Utc};
use log::{debug, warn};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    cli::Settings,
    credentials::parse_expiration,
    session::{self, SessionService},
    store::CredentialsStore,
};

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The stored session has not expired yet; nothing was fetched or written.
    StillValid { until: DateTime<FixedOffset> },
    /// New session credentials were written.
    Refreshed {
        expiration: DateTime<Utc>,
        backup: Option<PathBuf>,
    },
}

pub struct AwsMfaUpdater {
    /// Path to the AWS credentials file
    path: PathBuf,
    /// Profile receiving the session credentials
    target: String,
    /// Requested session lifetime in seconds, STS default when `None`
    duration: Option<u32>,
}

impl AwsMfaUpdater {
    pub fn new(settings: &Settings) -> Self {
        Self {
            path: settings.credentials_path.clone(),
            target: settings.target.clone(),
            duration: settings.duration,
        }
    }

    /// Refreshes the target profile unless its session is still valid.
    ///
    /// `otp` is only invoked once a refresh is actually needed, so an interactive prompt
    /// never appears for a no-op run. Errors from the AWS calls and from the filesystem
    /// are returned as-is with context; nothing is retried.
    pub async fn update_credentials<S, F>(&self, service: &S, otp: F) -> Result<Outcome>
    where
        S: SessionService,
        F: FnOnce() -> Result<String>,
    {
        let store = CredentialsStore::load(&self.path).await?;
        debug!(
            "Loaded {} profile(s) from {}: {}",
            store.len(),
            self.path.display(),
            store.names().collect::<Vec<_>>().join(", ")
        );

        if let Some(until) = still_valid(&store, &self.target, Utc::now()) {
            return Ok(Outcome::StillValid { until });
        }

        let token = otp()?;
        let session = session::exchange(service, &token, self.duration).await?;

        let store = store.with_session(&self.target, &session);
        let backup = self.write(&store).await?;

        Ok(Outcome::Refreshed {
            expiration: session.expiration,
            backup,
        })
    }

    /// Backs up the current file, if any, then replaces it with `store`.
    async fn write(&self, store: &CredentialsStore) -> Result<Option<PathBuf>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let backup = self.backup().await?;

        if let Some(profile) = store.profile(&self.target) {
            debug!(
                "Writing [{}] for access key {} with {} additional key(s)",
                self.target,
                profile.access_key_id().unwrap_or_default(),
                profile.unmanaged().count()
            );
        }
        write_owner_only(&self.path, &store.to_string())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        // An existing file keeps its old mode when truncated.
        restrict_permissions(&self.path).await?;

        Ok(backup)
    }

    async fn backup(&self) -> Result<Option<PathBuf>> {
        let is_file = fs::metadata(&self.path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if !is_file {
            return Ok(None);
        }

        let backup = backup_path(&self.path, Local::now());
        ensure!(
            !fs::try_exists(&backup).await?,
            "Backup {} already exists",
            backup.display()
        );

        debug!("Creating backup of {} to {}", self.path.display(), backup.display());
        fs::copy(&self.path, &backup)
            .await
            .with_context(|| format!("Failed to back up {}", self.path.display()))?;

        Ok(Some(backup))
    }
}

/// Returns the expiry of the stored session in `target` when it is still later than `now`.
///
/// A profile without `aws_session_expiration`, or with a value that can't be parsed,
/// counts as expired.
pub fn still_valid(
    store: &CredentialsStore,
    target: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<FixedOffset>> {
    let raw = store
        .profile(target)?
        .session_expiration()
        .filter(|value| !value.is_empty())?;

    match parse_expiration(raw) {
        Ok(expiration) => (expiration > now).then_some(expiration),
        Err(e) => {
            warn!("Ignoring unreadable aws_session_expiration `{raw}` in [{target}]: {e}");
            None
        }
    }
}

/// `<path>.bak.<ISO 8601 local time>`, e.g. `credentials.bak.2026-10-18T11:04:05.123456`.
pub fn backup_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak.{}", at.format("%Y-%m-%dT%H:%M:%S%.6f")));
    PathBuf::from(name)
}

/// Writes `content` to `path`. A file that doesn't exist yet is created with mode 0600.
async fn write_owner_only(path: &Path, content: &str) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::{fs::Permissions, os::unix::fs::PermissionsExt};

    fs::set_permissions(path, Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("Failed to restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
