// ABOUTME: Mattermost implementation of the backend capability traits
// ABOUTME: REST API v4 over reqwest plus the live event WebSocket

pub mod client;
pub mod websocket;

pub use client::MattermostClient;

use anyhow::{Context, Result};
use mattermostd_core::{Backend, Config, Connector};
use std::sync::Arc;
use std::time::Duration;

/// Protocol label accepted in `account add`
pub const PROTOCOL: &str = "mattermost";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates one unauthenticated client per account server
pub struct MattermostConnector {
    disable_encryption: bool,
    http: reqwest::Client,
}

impl MattermostConnector {
    pub fn new(disable_encryption: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            disable_encryption,
            http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.disable_encryption)
    }
}

impl Connector for MattermostConnector {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn connect(&self, server: &str) -> Result<Arc<dyn Backend>> {
        if server.is_empty() {
            anyhow::bail!("Empty server address");
        }
        Ok(Arc::new(MattermostClient::new(
            self.http.clone(),
            server,
            self.disable_encryption,
        )))
    }
}
