// ABOUTME: Account registry owning configured accounts and their running sessions
// ABOUTME: Allocates the lowest free id, persists every change and starts/stops sessions

use crate::account::{Account, AccountId};
use crate::session::{Session, SessionHandle, SessionSpawner};
use crate::store::AccountStore;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// One account and its session, if one is running
pub struct AccountEntry {
    pub account: Account,
    session: Option<SessionHandle>,
}

impl AccountEntry {
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref().map(|handle| handle.session())
    }

    pub fn is_online(&self) -> bool {
        self.session().map(|s| s.is_online()).unwrap_or(false)
    }
}

/// Central registry for all configured accounts.
///
/// Every mutation rewrites the account store; a failed write is returned
/// to the caller, which treats it as fatal.
pub struct AccountRegistry {
    entries: HashMap<AccountId, AccountEntry>,
    store: AccountStore,
    spawner: SessionSpawner,
}

impl AccountRegistry {
    /// Create an empty registry
    pub fn new(store: AccountStore, spawner: SessionSpawner) -> Self {
        Self {
            entries: HashMap::new(),
            store,
            spawner,
        }
    }

    /// Read accounts from the store without starting them
    pub fn load(&mut self) {
        for account in self.store.load() {
            let id = account.id;
            let replaced = self.entries.insert(
                id,
                AccountEntry {
                    account,
                    session: None,
                },
            );
            if replaced.is_some() {
                tracing::warn!(account_id = id, "Duplicate account id in store, keeping the last one");
            }
        }
        tracing::info!(count = self.entries.len(), "Accounts loaded");
    }

    /// Start a session for every account that does not have one yet
    pub fn start_all(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.session.is_none() {
                entry.session = self.spawner.spawn(&entry.account);
            }
        }
    }

    /// Stop every session; each gets a bounded grace period
    pub async fn stop_all(&mut self) {
        let handles: Vec<SessionHandle> = self
            .entries
            .values_mut()
            .filter_map(|entry| entry.session.take())
            .collect();
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// Lowest non-negative id not in use
    pub fn free_id(&self) -> AccountId {
        (0..)
            .find(|id| !self.entries.contains_key(id))
            .unwrap_or(AccountId::MAX)
    }

    /// Create, persist and start a new account; returns its id
    pub fn add(&mut self, protocol: &str, user: &str, password: &str) -> Result<AccountId> {
        let id = self.free_id();
        let account = Account::new(id, protocol, user, password);
        self.entries.insert(
            id,
            AccountEntry {
                account,
                session: None,
            },
        );
        self.save()?;
        tracing::info!(account_id = id, protocol = %protocol, user = %user, "Added account");

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.session = self.spawner.spawn(&entry.account);
        }
        Ok(id)
    }

    /// Stop and remove an account. Returns false if the id is unknown.
    pub async fn delete(&mut self, id: AccountId) -> Result<bool> {
        let Some(entry) = self.entries.remove(&id) else {
            return Ok(false);
        };
        if let Some(handle) = entry.session {
            handle.shutdown().await;
        }
        self.save()?;
        tracing::info!(account_id = id, "Deleted account");
        Ok(true)
    }

    pub fn get(&self, id: AccountId) -> Option<&AccountEntry> {
        self.entries.get(&id)
    }

    /// All accounts ordered by ascending id
    pub fn list(&self) -> Vec<&AccountEntry> {
        let mut entries: Vec<&AccountEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.account.id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<()> {
        let accounts: Vec<Account> = self
            .list()
            .into_iter()
            .map(|entry| entry.account.clone())
            .collect();
        self.store.save(&accounts).with_context(|| {
            format!("Failed to save accounts to {}", self.store.path().display())
        })
    }
}
