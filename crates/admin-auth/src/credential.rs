//! Credential storage for the admin session
//!
//! Persists the current session's tokens as a single JSON document so the
//! session survives restarts. All writes use atomic temp-file + rename to
//! prevent corruption on crash. A tokio Mutex serializes mutation from
//! login, refresh, and forced sign-out.
//!
//! The in-memory state is authoritative: if a disk write fails the error is
//! returned, but readers still observe the new value. A freshly rotated
//! access token must be usable for the retry even when the file is stale.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The current session's tokens.
///
/// `access` is short-lived and attached as a bearer header to every
/// authenticated request. `refresh` is longer-lived and used only to mint a
/// new access token; backends that do not rotate refresh tokens may omit it
/// from refresh responses, in which case the previous one is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Current access token (bearer token for API calls)
    pub access: String,
    /// Refresh token for obtaining new access tokens, if one was issued
    pub refresh: Option<String>,
}

/// File-backed store for the single admin session credential.
///
/// `None` means signed out. Reads briefly acquire the lock to clone the
/// in-memory state, so they never wait on a disk write in progress.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl CredentialStore {
    /// Load the credential from the given file path.
    ///
    /// If the file doesn't exist, creates it as `null` (signed-out cold
    /// start). A malformed file is an error rather than a silent sign-out
    /// so that corruption is noticed.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credential: Option<Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                signed_in = credential.is_some(),
                "loaded credential file"
            );
            credential
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            write_atomic(&path, &None).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of the current credential, or `None` when signed out.
    pub async fn get(&self) -> Option<Credential> {
        let state = self.state.lock().await;
        state.clone()
    }

    /// Replace the stored credential and persist to disk.
    ///
    /// The in-memory value is updated before the disk write, so a failed
    /// write still leaves the new credential visible to `get()`.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = Some(credential);
        debug!("stored credential");
        write_atomic(&self.path, &state).await
    }

    /// Remove the stored credential (sign out) and persist to disk.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = None;
        debug!("cleared credential");
        write_atomic(&self.path, &state).await
    }
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. This prevents corruption if the process crashes mid-write.
/// Sets file permissions to 0600 (owner read/write only) since the file
/// contains session tokens.
async fn write_atomic(path: &Path, data: &Option<Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}
