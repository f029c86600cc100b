// ABOUTME: XDG base directory lookup for the daemon's working directory
// ABOUTME: Working dir holds config.toml, accounts.json, channel cursors, log and socket

use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// Directory name used below the user config dir
pub const APPLICATION: &str = "nuqql-mattermostd";

/// Default working directory (e.g., ~/.config/nuqql-mattermostd/)
/// Falls back to ./nuqql-mattermostd if no home directory can be found
pub fn default_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.config_dir().join(APPLICATION))
        .unwrap_or_else(|| PathBuf::from(".").join(APPLICATION))
}

pub fn config_file(dir: &Path) -> PathBuf {
    dir.join("config.toml")
}

pub fn accounts_file(dir: &Path) -> PathBuf {
    dir.join("accounts.json")
}

/// Per-account channel cursor file, e.g. `channels3.json`
pub fn channels_file(dir: &Path, account_id: u32) -> PathBuf {
    dir.join(format!("channels{}.json", account_id))
}

pub fn log_file(dir: &Path) -> PathBuf {
    dir.join(format!("{}.log", APPLICATION))
}
