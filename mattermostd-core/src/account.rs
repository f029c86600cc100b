// ABOUTME: Account record: one configured identity for a remote chat server
// ABOUTME: Serialized with the field names used by accounts.json

use serde::{Deserialize, Serialize};

/// Numeric account id; allocated densely by the registry
pub type AccountId = u32;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "ID")]
    pub id: AccountId,
    #[serde(rename = "Protocol")]
    pub protocol: String,
    /// `username@server`
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Password")]
    pub password: String,
}

// Custom Debug impl to redact the password
impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Account {
    pub fn new(
        id: AccountId,
        protocol: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id,
            protocol: protocol.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Split `user` into `(username, server)` at the first `@`
    pub fn split_user(&self) -> Option<(&str, &str)> {
        self.user.split_once('@')
    }
}
