// ABOUTME: Root library module for the nuqql-mattermostd daemon
// ABOUTME: Mattermost adapter, frontend listener and logging setup on top of mattermostd-core

// Daemon-specific modules (stay local)
pub mod cli;
pub mod logging;
pub mod mattermost;
pub mod server;

// Re-export platform-agnostic modules from mattermostd-core
pub use mattermostd_core::commands;
pub use mattermostd_core::config;
pub use mattermostd_core::paths;
pub use mattermostd_core::registry;
pub use mattermostd_core::session;

// Re-export core types for convenience
pub use mattermostd_core::{AccountRegistry, Config, Dispatcher, Mailbox, Shutdown};
