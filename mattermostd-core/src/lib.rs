// ABOUTME: Account sessions, outgoing mailbox and line-protocol dispatch for nuqql-mattermostd
// ABOUTME: Backend-agnostic: a concrete chat server plugs in through the Backend/Connector traits

pub mod account;
pub mod commands;
pub mod config;
pub mod frontend;
pub mod mailbox;
pub mod model;
pub mod paths;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod text;
pub mod traits;

pub use account::{Account, AccountId};
pub use commands::{Dispatcher, Flow, FrontendCommand, FrontendOptions};
pub use config::Config;
pub use mailbox::{FrontendWriter, Mailbox, MailboxOptions};
pub use registry::AccountRegistry;
pub use session::{Session, SessionHandle, SessionSettings, SessionSpawner, SessionState};
pub use shutdown::Shutdown;
pub use store::{AccountStore, CursorStore};
pub use traits::{Backend, Connector, EventStream};
