// ABOUTME: Frontend line-protocol commands: parsing and execution against the account registry
// ABOUTME: Malformed or unknown commands are ignored; every reply goes through the mailbox

use crate::account::AccountId;
use crate::mailbox::Mailbox;
use crate::model::UserStatus;
use crate::paths;
use crate::registry::{AccountEntry, AccountRegistry};
use crate::text::{path_escape, unescape_message};
use anyhow::Result;

/// Static reply to `help`
pub const HELP: &str = "info: List of commands and their description:
account list
    list all accounts and their account ids.
account add <protocol> <user> <password>
    add a new account for chat protocol <protocol> with user name <user> and
    the password <password>. The supported chat protocol(s) are backend
    specific. The user name is chat protocol specific. An account id is
    assigned to the account that can be shown with \"account list\".
account <id> delete
    delete the account with the account id <id>.
account <id> buddies [online]
    list all buddies on the account with the account id <id>. Optionally, show
    only online buddies with the extra parameter \"online\".
account <id> collect
    collect all messages received on the account with the account id <id>.
account <id> send <user> <msg>
    send a message to the user <user> on the account with the account id <id>.
account <id> status get
    get the status of the account with the account id <id>.
account <id> status set <status>
    set the status of the account with the account id <id> to <status>.
account <id> chat list
    list all group chats on the account with the account id <id>.
account <id> chat join <chat>
    join the group chat <chat> on the account with the account id <id>.
account <id> chat part <chat>
    leave the group chat <chat> on the account with the account id <id>.
account <id> chat send <chat> <msg>
    send the message <msg> to the group chat <chat> on the account with the
    account id <id>.
account <id> chat users <chat>
    list the users in the group chat <chat> on the account with the
    account id <id>.
account <id> chat invite <chat> <user>
    invite the user <user> to the group chat <chat> on the account with the
    account id <id>.
version
    get version of the backend
bye
    disconnect from backend
quit
    quit backend
help
    show this help\r\n";

// =============================================================================
// Parsing
// =============================================================================

/// A recognized frontend command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendCommand {
    AccountList,
    AccountAdd {
        protocol: String,
        user: String,
        password: String,
    },
    Account {
        id: AccountId,
        action: AccountAction,
    },
    Version,
    Help,
    Bye,
    Quit,
}

/// Operations on one existing account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountAction {
    Delete,
    Buddies,
    Collect,
    /// `message` is already unescaped
    Send { channel: String, message: String },
    StatusGet,
    StatusSet(UserStatus),
    ChatList,
    ChatJoin(String),
    ChatPart(String),
    ChatSend { channel: String, message: String },
    ChatUsers(String),
    ChatInvite { channel: String, user: String },
}

/// Parse one line (without CR LF). Tokens are separated by single spaces;
/// message bodies are the rest of the line. Returns `None` for anything
/// unknown or with too few arguments.
pub fn parse_command(line: &str) -> Option<FrontendCommand> {
    let parts: Vec<&str> = line.split(' ').collect();
    match parts[0] {
        "account" => parse_account(&parts),
        "version" => Some(FrontendCommand::Version),
        "help" => Some(FrontendCommand::Help),
        "bye" => Some(FrontendCommand::Bye),
        "quit" => Some(FrontendCommand::Quit),
        _ => None,
    }
}

fn parse_account(parts: &[&str]) -> Option<FrontendCommand> {
    match *parts.get(1)? {
        "list" => return Some(FrontendCommand::AccountList),
        "add" if parts.len() >= 5 => {
            return Some(FrontendCommand::AccountAdd {
                protocol: parts[2].to_string(),
                user: parts[3].to_string(),
                password: parts[4].to_string(),
            })
        }
        "add" => return None,
        _ => {}
    }

    let id = parse_account_id(parts[1])?;
    let action = match *parts.get(2)? {
        "delete" => AccountAction::Delete,
        "buddies" => AccountAction::Buddies,
        "collect" => AccountAction::Collect,
        "send" if parts.len() >= 5 => AccountAction::Send {
            channel: parts[3].to_string(),
            message: unescape_message(&parts[4..].join(" ")),
        },
        "status" => match *parts.get(3)? {
            "get" => AccountAction::StatusGet,
            "set" => AccountAction::StatusSet(parts.get(4)?.parse().ok()?),
            _ => return None,
        },
        "chat" => parse_chat(parts)?,
        _ => return None,
    };
    Some(FrontendCommand::Account { id, action })
}

/// Account ids are unsigned 16-bit decimals without sign or spaces
fn parse_account_id(token: &str) -> Option<AccountId> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u16>().ok().map(AccountId::from)
}

fn parse_chat(parts: &[&str]) -> Option<AccountAction> {
    let arg = |i: usize| parts.get(i).map(|s| s.to_string());
    let action = match *parts.get(3)? {
        "list" => AccountAction::ChatList,
        "join" => AccountAction::ChatJoin(arg(4)?),
        "part" => AccountAction::ChatPart(arg(4)?),
        "users" => AccountAction::ChatUsers(arg(4)?),
        "send" if parts.len() >= 6 => AccountAction::ChatSend {
            channel: parts[4].to_string(),
            message: unescape_message(&parts[5..].join(" ")),
        },
        "invite" if parts.len() >= 6 => AccountAction::ChatInvite {
            channel: parts[4].to_string(),
            user: parts[5].to_string(),
        },
        _ => return None,
    };
    Some(action)
}

// =============================================================================
// Replies
// =============================================================================

/// `account: <id> () <protocol> <user> <online|offline>`
pub fn account_line(entry: &AccountEntry) -> String {
    let status = if entry.is_online() { "online" } else { "offline" };
    format!(
        "account: {} () {} {} {}\r\n",
        entry.account.id, entry.account.protocol, entry.account.user, status
    )
}

/// Every account line, the closing info line and, if there are no
/// accounts, a short how-to
pub fn account_list(registry: &AccountRegistry) -> String {
    let mut out: String = registry.list().into_iter().map(account_line).collect();
    out.push_str("info: listed accounts.\r\n");
    if registry.is_empty() {
        out.push_str("info: You do not have any accounts configured.\r\n");
        out.push_str(
            "info: You can add a new mattermost account with the following command: \
             account add mattermost <username>@<server> <password>\r\n",
        );
        out.push_str(
            "info: Example: account add mattermost dummy@yourserver.org:8065 YourPassword\r\n",
        );
    }
    out
}

// =============================================================================
// Dispatch
// =============================================================================

/// What the connection should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Close this connection
    Bye,
    /// Close this connection and stop the daemon
    Quit,
}

#[derive(Debug, Clone)]
pub struct FrontendOptions {
    /// Push the account list on connect and the new account line after `add`
    pub push_accounts: bool,
    pub name: String,
    pub version: String,
}

impl FrontendOptions {
    pub fn new(push_accounts: bool) -> Self {
        Self {
            push_accounts,
            name: paths::APPLICATION.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Executes frontend commands and queues their replies
#[derive(Clone)]
pub struct Dispatcher {
    mailbox: Mailbox,
    options: FrontendOptions,
}

impl Dispatcher {
    pub fn new(mailbox: Mailbox, options: FrontendOptions) -> Self {
        Self { mailbox, options }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Greeting written straight to a new connection before it is attached
    pub fn welcome(&self, registry: &AccountRegistry) -> String {
        let mut out = format!(
            "info: Welcome to {} v{}!\r\n\
             info: Enter \"help\" for a list of available commands and their help texts\r\n",
            self.options.name, self.options.version
        );
        if self.options.push_accounts {
            out.push_str("info: Listing your accounts:\r\n");
            out.push_str(&account_list(registry));
        }
        out
    }

    /// Parse and execute one line. Errors are fatal (account store writes).
    pub async fn handle_line(&self, line: &str, registry: &mut AccountRegistry) -> Result<Flow> {
        tracing::debug!(command = %redact_command(line), "Frontend command");
        match parse_command(line) {
            Some(command) => self.execute(command, registry).await,
            None => Ok(Flow::Continue),
        }
    }

    pub async fn execute(
        &self,
        command: FrontendCommand,
        registry: &mut AccountRegistry,
    ) -> Result<Flow> {
        match command {
            FrontendCommand::AccountList => self.mailbox.send(account_list(registry)),
            FrontendCommand::AccountAdd {
                protocol,
                user,
                password,
            } => {
                let id = registry.add(&protocol, &user, &password)?;
                self.mailbox.send(format!("info: added account {}.\r\n", id));
                if self.options.push_accounts {
                    if let Some(entry) = registry.get(id) {
                        self.mailbox.send(account_line(entry));
                    }
                }
            }
            FrontendCommand::Account { id, action } => self.execute_account(id, action, registry).await?,
            FrontendCommand::Version => self.mailbox.send(format!(
                "info: version: {} v{}\r\n",
                self.options.name, self.options.version
            )),
            FrontendCommand::Help => self.mailbox.send(HELP),
            FrontendCommand::Bye => return Ok(Flow::Bye),
            FrontendCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn execute_account(
        &self,
        id: AccountId,
        action: AccountAction,
        registry: &mut AccountRegistry,
    ) -> Result<()> {
        if action == AccountAction::Delete {
            if registry.delete(id).await? {
                self.mailbox.send(format!("info: account {} deleted.\r\n", id));
            }
            return Ok(());
        }

        let Some(entry) = registry.get(id) else {
            return Ok(());
        };
        let Some(session) = entry.session().cloned() else {
            tracing::debug!(account_id = id, "Account has no session");
            return Ok(());
        };

        match action {
            AccountAction::Delete => {}
            AccountAction::Buddies => {
                for buddy in session.buddies() {
                    self.mailbox.send(format!(
                        "buddy: {} status: {} name: {} alias: {}\r\n",
                        id,
                        buddy.status,
                        buddy.user,
                        path_escape(&buddy.name)
                    ));
                }
            }
            AccountAction::Collect => session.collect_history(),
            AccountAction::Send { channel, message }
            | AccountAction::ChatSend { channel, message } => {
                session.send_message(&channel, &message).await
            }
            AccountAction::StatusGet => {
                if let Some(status) = session.status().await {
                    self.mailbox
                        .send(format!("status: account {} status: {}\r\n", id, status));
                }
            }
            AccountAction::StatusSet(status) => session.set_status(status).await,
            AccountAction::ChatList => {
                let username = session.own_username();
                for buddy in session.buddies() {
                    self.mailbox.send(format!(
                        "chat: list: {} {} {} {}\r\n",
                        id,
                        buddy.user,
                        path_escape(&buddy.name),
                        username
                    ));
                }
            }
            AccountAction::ChatJoin(channel) => {
                tracing::info!(account_id = id, channel = %channel, "Joining channel");
                session.join_channel(&channel).await
            }
            AccountAction::ChatPart(channel) => {
                tracing::info!(account_id = id, channel = %channel, "Leaving channel");
                session.part_channel(&channel).await
            }
            AccountAction::ChatUsers(channel) => {
                for user in session.channel_users(&channel).await {
                    self.mailbox.send(format!(
                        "chat: user: {} {} {} {} {}\r\n",
                        id,
                        channel,
                        user.id,
                        path_escape(&user.username),
                        user.status
                    ));
                }
            }
            AccountAction::ChatInvite { channel, user } => {
                tracing::info!(account_id = id, channel = %channel, user = %user, "Inviting user");
                session.add_user(&channel, &user).await
            }
        }
        Ok(())
    }
}

/// Hide the password of `account add` in logs
fn redact_command(line: &str) -> String {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() >= 5 && parts[0] == "account" && parts[1] == "add" {
        format!("account add {} {} [REDACTED]", parts[2], parts[3])
    } else {
        line.to_string()
    }
}
