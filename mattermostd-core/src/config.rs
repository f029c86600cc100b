// ABOUTME: Daemon configuration from <dir>/config.toml with environment variable overrides
// ABOUTME: Provides defaults for every field and the derived listen network/address

use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Working directory: config, accounts, cursors, log file, unix socket
    #[serde(default = "paths::default_dir")]
    pub dir: PathBuf,
    /// Address family: "inet" (TCP) or "unix"
    #[serde(default = "default_af")]
    pub af: String,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unix socket file name inside `dir`
    #[serde(default = "default_sockfile")]
    pub sockfile: String,
    /// One of debug, info, warn, error
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
    #[serde(default)]
    pub disable_history: bool,
    #[serde(default)]
    pub push_accounts: bool,
    #[serde(default)]
    pub disable_filter_own: bool,
    #[serde(default)]
    pub disable_encryption: bool,
    /// Max lines kept in each history buffer (0 = unbounded)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Max undelivered frontend lines (0 = unbounded)
    #[serde(default = "default_pending_limit")]
    pub pending_limit: usize,
}

fn default_af() -> String {
    "inet".to_string()
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    32000
}

fn default_sockfile() -> String {
    format!("{}.sock", paths::APPLICATION)
}

fn default_loglevel() -> String {
    "warn".to_string()
}

fn default_history_limit() -> usize {
    10_000
}

fn default_pending_limit() -> usize {
    100_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: paths::default_dir(),
            af: default_af(),
            address: default_address(),
            port: default_port(),
            sockfile: default_sockfile(),
            loglevel: default_loglevel(),
            disable_history: false,
            push_accounts: false,
            disable_filter_own: false,
            disable_encryption: false,
            history_limit: default_history_limit(),
            pending_limit: default_pending_limit(),
        }
    }
}

/// How the frontend listener binds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenNetwork {
    Tcp,
    Unix,
}

impl Config {
    /// Pick the working directory: explicit value, then MATTERMOSTD_DIR, then the XDG default
    pub fn resolve_dir(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os("MATTERMOSTD_DIR").map(PathBuf::from))
            .unwrap_or_else(paths::default_dir)
    }

    /// Load `<dir>/config.toml` (defaults if it does not exist), then apply
    /// environment variable overrides. `dir` always wins over a `dir` key in the file.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = paths::config_file(dir);
        let mut config = if config_path.exists() {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };
        config.dir = dir.to_path_buf();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("MATTERMOSTD_AF") {
            self.af = val;
        }
        if let Ok(val) = std::env::var("MATTERMOSTD_ADDRESS") {
            self.address = val;
        }
        if let Ok(val) = std::env::var("MATTERMOSTD_PORT") {
            self.port = val.parse().with_context(|| {
                format!("MATTERMOSTD_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("MATTERMOSTD_SOCKFILE") {
            self.sockfile = val;
        }
        if let Ok(val) = std::env::var("MATTERMOSTD_LOGLEVEL") {
            self.loglevel = val;
        }
        Ok(())
    }

    pub fn listen_network(&self) -> ListenNetwork {
        if self.af == "unix" {
            ListenNetwork::Unix
        } else {
            ListenNetwork::Tcp
        }
    }

    /// Socket path for unix, `address:port` for TCP
    pub fn listen_address(&self) -> String {
        match self.listen_network() {
            ListenNetwork::Unix => self.dir.join(&self.sockfile).display().to_string(),
            ListenNetwork::Tcp => format!("{}:{}", self.address, self.port),
        }
    }

    /// Tracing filter directive for `loglevel`; unknown levels turn logging off
    pub fn log_filter(&self) -> &'static str {
        match self.loglevel.as_str() {
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => "off",
        }
    }

    pub fn history_enabled(&self) -> bool {
        !self.disable_history
    }
}
