// ABOUTME: Command-line flags; every flag overrides the matching config value
// ABOUTME: Parsed with clap derive, applied after config.toml and environment overrides

use clap::Parser;
use mattermostd_core::Config;
use std::path::PathBuf;

/// nuqql backend for Mattermost
#[derive(Parser, Debug, Default)]
#[command(name = "nuqql-mattermostd", version, about, long_about = None)]
pub struct Args {
    /// Socket address family: "inet" or "unix"
    #[arg(long, value_parser = ["inet", "unix"])]
    pub af: Option<String>,

    /// AF_INET listen address
    #[arg(long)]
    pub address: Option<String>,

    /// AF_INET listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// AF_UNIX socket file in the working directory
    #[arg(long)]
    pub sockfile: Option<String>,

    /// Working directory
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Logging level
    #[arg(long, value_parser = ["debug", "info", "warn", "error"])]
    pub loglevel: Option<String>,

    /// Disable message history
    #[arg(long)]
    pub disable_history: bool,

    /// Push accounts to the client on connect
    #[arg(long)]
    pub push_accounts: bool,

    /// Deliver messages sent by the account itself
    #[arg(long)]
    pub disable_filter_own: bool,

    /// Use plain http and ws to talk to the server
    #[arg(long)]
    pub disable_encryption: bool,
}

impl Args {
    /// Apply the flags that were given on top of `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(af) = &self.af {
            config.af = af.clone();
        }
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(sockfile) = &self.sockfile {
            config.sockfile = sockfile.clone();
        }
        if let Some(loglevel) = &self.loglevel {
            config.loglevel = loglevel.clone();
        }
        config.disable_history |= self.disable_history;
        config.push_accounts |= self.push_accounts;
        config.disable_filter_own |= self.disable_filter_own;
        config.disable_encryption |= self.disable_encryption;
    }
}
