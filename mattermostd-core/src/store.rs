// ABOUTME: JSON-file persistence for accounts and per-channel history cursors
// ABOUTME: Reads degrade to empty data with a log; write failures are returned to the caller

use crate::account::Account;
use crate::paths;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path`, replacing it, readable by the owner only
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    // mode() only applies on create
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions of {}", path.display()))?;
    }
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// =============================================================================
// Accounts
// =============================================================================

/// `accounts.json`: a sequence of JSON account objects
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: paths::accounts_file(dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all readable accounts. A missing or unreadable file yields an
    /// empty list; a corrupt record stops loading and keeps what came before.
    pub fn load(&self) -> Vec<Account> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No accounts file yet");
                return Vec::new();
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to read accounts");
                return Vec::new();
            }
        };

        let mut accounts = Vec::new();
        for record in serde_json::Deserializer::from_str(&content).into_iter::<Account>() {
            match record {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    tracing::error!(
                        path = %self.path.display(),
                        error = %e,
                        loaded = accounts.len(),
                        "Corrupt account record, ignoring the rest of the file"
                    );
                    break;
                }
            }
        }
        tracing::debug!(count = accounts.len(), "Loaded accounts");
        accounts
    }

    /// Rewrite the whole file with `accounts`
    pub fn save(&self, accounts: &[Account]) -> Result<()> {
        let mut out = Vec::new();
        for account in accounts {
            serde_json::to_writer(&mut out, account).context("Failed to encode account")?;
            out.push(b'\n');
        }
        write_private(&self.path, &out)
    }
}

// =============================================================================
// Channel cursors
// =============================================================================

/// `channels<ID>.json`: last delivered post id per channel for one account
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
    cursors: HashMap<String, String>,
}

impl CursorStore {
    /// Open the cursor file of `account_id`, starting empty if it cannot be read
    pub fn open(dir: &Path, account_id: u32) -> Self {
        let mut store = Self {
            path: paths::channels_file(dir, account_id),
            cursors: HashMap::new(),
        };
        store.cursors = store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HashMap<String, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to read channel cursors");
                return HashMap::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to parse channel cursors");
            HashMap::new()
        })
    }

    pub fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.cursors).context("Failed to encode channel cursors")?;
        write_private(&self.path, &bytes)
    }

    /// Last delivered post id of `channel_id`, empty if none
    pub fn get(&self, channel_id: &str) -> &str {
        self.cursors.get(channel_id).map(String::as_str).unwrap_or("")
    }

    /// Record `post_id` as delivered in memory; call [`CursorStore::save`] to persist
    pub fn set(&mut self, channel_id: &str, post_id: &str) {
        self.cursors
            .insert(channel_id.to_string(), post_id.to_string());
    }

    pub fn forget(&mut self, channel_id: &str) {
        self.cursors.remove(channel_id);
    }

    pub fn cursors(&self) -> &HashMap<String, String> {
        &self.cursors
    }
}
