// ABOUTME: Scripted in-memory backend and connector shared by the integration tests
// ABOUTME: Records every call and lets tests push live events or drop the event stream

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use mattermostd_core::model::{
    Channel, ChannelMember, Post, PostList, Team, User, UserStatus, WebSocketEvent,
};
use mattermostd_core::{
    AccountRegistry, AccountStore, Backend, Connector, EventStream, Mailbox, MailboxOptions,
    SessionSettings, SessionSpawner, Shutdown,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const SELF_ID: &str = "selfselfselfselfselfselfse";
pub const ALICE_ID: &str = "alicealicealicealicealicea";
pub const TEAM_ID: &str = "teamteamteamteamteamteamte";
pub const CHANNEL_ID: &str = "chanchanchanchanchanchanch";

/// Remote state served by the fake
#[derive(Default)]
pub struct FakeState {
    pub fail_login: bool,
    pub self_user: User,
    pub teams: Vec<Team>,
    pub channels: HashMap<String, Vec<Channel>>,
    pub users: HashMap<String, User>,
    pub statuses: HashMap<String, String>,
    /// Posts per channel, oldest first
    pub posts: HashMap<String, Vec<Post>>,
    pub members: HashMap<String, Vec<String>>,
    pub file_links: HashMap<String, String>,
}

pub struct FakeBackend {
    pub state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::Sender<WebSocketEvent>>>,
    pings: Mutex<Option<mpsc::Sender<()>>>,
    streams_opened: Mutex<usize>,
}

pub fn user(id: &str, username: &str) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        email: format!("{}@example.org", username),
    }
}

pub fn post(id: &str, channel_id: &str, user_id: &str, create_at: i64, message: &str) -> Post {
    Post {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        user_id: user_id.to_string(),
        create_at,
        message: message.to_string(),
        metadata: None,
    }
}

impl FakeBackend {
    /// One team with one open channel, a logged-in user "me" and a user "alice"
    pub fn new() -> Arc<Self> {
        let mut state = FakeState {
            self_user: user(SELF_ID, "me"),
            ..Default::default()
        };
        state.teams.push(Team {
            id: TEAM_ID.to_string(),
            name: "dev".to_string(),
            display_name: "Dev Team".to_string(),
        });
        state.channels.insert(
            TEAM_ID.to_string(),
            vec![Channel {
                id: CHANNEL_ID.to_string(),
                team_id: TEAM_ID.to_string(),
                name: "town-square".to_string(),
                display_name: "Town Square".to_string(),
                ..Default::default()
            }],
        );
        state.users.insert(SELF_ID.to_string(), user(SELF_ID, "me"));
        state.users.insert(ALICE_ID.to_string(), user(ALICE_ID, "alice"));
        state.statuses.insert(SELF_ID.to_string(), "online".to_string());
        state.statuses.insert(ALICE_ID.to_string(), "away".to_string());
        Arc::new(Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            pings: Mutex::new(None),
            streams_opened: Mutex::new(0),
        })
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn streams_opened(&self) -> usize {
        *self.streams_opened.lock().unwrap()
    }

    pub fn add_post(&self, post: Post) {
        self.state
            .lock()
            .unwrap()
            .posts
            .entry(post.channel_id.clone())
            .or_default()
            .push(post);
    }

    /// Push a live event into the currently open stream
    pub async fn emit(&self, event: WebSocketEvent) {
        let tx = self.events.lock().unwrap().clone();
        tx.expect("no open event stream").send(event).await.unwrap();
    }

    pub async fn emit_post(&self, post: Post) {
        let event = WebSocketEvent::new("posted")
            .with_data("post", serde_json::to_string(&post).unwrap());
        self.emit(event).await;
    }

    pub async fn ping_timeout(&self) {
        let tx = self.pings.lock().unwrap().clone();
        tx.expect("no open event stream").send(()).await.unwrap();
    }

    /// Drop the sender side so the session sees the stream end
    pub fn close_stream(&self) {
        self.events.lock().unwrap().take();
        self.pings.lock().unwrap().take();
    }

    fn lookup<T: Clone>(map: &HashMap<String, T>, key: &str, what: &str) -> Result<T> {
        map.get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} {} not found", what, key))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn login(&self, username: &str, _password: &str) -> Result<User> {
        self.record(format!("login {}", username));
        let state = self.state.lock().unwrap();
        if state.fail_login {
            anyhow::bail!("invalid credentials");
        }
        Ok(state.self_user.clone())
    }

    async fn teams_for_user(&self, user_id: &str) -> Result<Vec<Team>> {
        self.record(format!("teams_for_user {}", user_id));
        Ok(self.state.lock().unwrap().teams.clone())
    }

    async fn channels_for_team_for_user(&self, team_id: &str, _user_id: &str) -> Result<Vec<Channel>> {
        self.record(format!("channels_for_team_for_user {}", team_id));
        Ok(self
            .state
            .lock()
            .unwrap()
            .channels
            .get(team_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn team(&self, team_id: &str) -> Result<Team> {
        self.record(format!("team {}", team_id));
        let state = self.state.lock().unwrap();
        state
            .teams
            .iter()
            .find(|t| t.id == team_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("team not found"))
    }

    async fn team_by_name(&self, name: &str) -> Result<Team> {
        self.record(format!("team_by_name {}", name));
        let state = self.state.lock().unwrap();
        state
            .teams
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("team not found"))
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel> {
        self.record(format!("channel {}", channel_id));
        let state = self.state.lock().unwrap();
        state
            .channels
            .values()
            .flatten()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("channel not found"))
    }

    async fn channel_by_name(&self, team_id: &str, name: &str) -> Result<Channel> {
        self.record(format!("channel_by_name {} {}", team_id, name));
        let state = self.state.lock().unwrap();
        state
            .channels
            .get(team_id)
            .and_then(|channels| channels.iter().find(|c| c.name == name))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("channel not found"))
    }

    async fn create_channel(&self, channel: &Channel) -> Result<Channel> {
        self.record(format!(
            "create_channel {} {} {:?}",
            channel.team_id, channel.name, channel.channel_type
        ));
        Ok(channel.clone())
    }

    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.record(format!("add_channel_member {} {}", channel_id, user_id));
        Ok(())
    }

    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()> {
        self.record(format!("remove_channel_member {} {}", channel_id, user_id));
        Ok(())
    }

    async fn channel_members(&self, channel_id: &str, page: u32, per_page: u32) -> Result<Vec<ChannelMember>> {
        self.record(format!("channel_members {} {} {}", channel_id, page, per_page));
        let state = self.state.lock().unwrap();
        let members = Self::lookup(&state.members, channel_id, "channel")?;
        Ok(members
            .into_iter()
            .map(|user_id| ChannelMember {
                channel_id: channel_id.to_string(),
                user_id,
            })
            .collect())
    }

    async fn user(&self, user_id: &str) -> Result<User> {
        self.record(format!("user {}", user_id));
        Self::lookup(&self.state.lock().unwrap().users, user_id, "user")
    }

    async fn user_by_email(&self, email: &str) -> Result<User> {
        self.record(format!("user_by_email {}", email));
        let state = self.state.lock().unwrap();
        state
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("user not found"))
    }

    async fn user_by_username(&self, username: &str) -> Result<User> {
        self.record(format!("user_by_username {}", username));
        let state = self.state.lock().unwrap();
        state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("user not found"))
    }

    async fn user_status(&self, user_id: &str) -> Result<String> {
        self.record(format!("user_status {}", user_id));
        Self::lookup(&self.state.lock().unwrap().statuses, user_id, "status")
    }

    async fn update_user_status(&self, user_id: &str, status: UserStatus) -> Result<()> {
        self.record(format!("update_user_status {} {}", user_id, status));
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(user_id.to_string(), status.to_string());
        Ok(())
    }

    async fn create_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        self.record(format!("create_post {} {}", channel_id, message));
        Ok(post("new", channel_id, SELF_ID, 0, message))
    }

    async fn posts_after(&self, channel_id: &str, after: &str, page: u32, per_page: u32) -> Result<PostList> {
        self.record(format!("posts_after {} {} {}", channel_id, after, page));
        let state = self.state.lock().unwrap();
        let all = state.posts.get(channel_id).cloned().unwrap_or_default();
        let start = if after.is_empty() {
            0
        } else {
            match all.iter().position(|p| p.id == after) {
                Some(i) => i + 1,
                None => all.len(),
            }
        };
        let end = (start + per_page as usize).min(all.len());
        let batch = &all[start..end];

        let mut list = PostList::default();
        for p in batch.iter().rev() {
            list.order.push(p.id.clone());
            list.posts.insert(p.id.clone(), p.clone());
        }
        if end < all.len() {
            list.next_post_id = all[end].id.clone();
        }
        Ok(list)
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        self.record(format!("file_link {}", file_id));
        Self::lookup(&self.state.lock().unwrap().file_links, file_id, "file")
    }

    async fn open_event_stream(&self) -> Result<EventStream> {
        self.record("open_event_stream".to_string());
        let (event_tx, event_rx) = mpsc::channel(64);
        let (ping_tx, ping_rx) = mpsc::channel(4);
        *self.events.lock().unwrap() = Some(event_tx);
        *self.pings.lock().unwrap() = Some(ping_tx);
        *self.streams_opened.lock().unwrap() += 1;
        Ok(EventStream::from_channels(event_rx, ping_rx, CancellationToken::new()))
    }
}

/// Hands out the same fake backend for every account
pub struct FakeConnector {
    pub backend: Arc<FakeBackend>,
    servers: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(backend: Arc<FakeBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            servers: Mutex::new(Vec::new()),
        })
    }

    pub fn servers(&self) -> Vec<String> {
        self.servers.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn protocol(&self) -> &'static str {
        "mattermost"
    }

    fn connect(&self, server: &str) -> Result<Arc<dyn Backend>> {
        self.servers.lock().unwrap().push(server.to_string());
        Ok(self.backend.clone())
    }
}

// =============================================================================
// Harness helpers
// =============================================================================

/// Settings with short delays so reconnect tests run quickly
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        reconnect_delay: Duration::from_millis(50),
        ..SessionSettings::default()
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub connector: Arc<FakeConnector>,
    pub mailbox: Mailbox,
    pub shutdown: Shutdown,
    pub registry: AccountRegistry,
}

pub fn harness(dir: &Path, settings: SessionSettings) -> Harness {
    let backend = FakeBackend::new();
    let connector = FakeConnector::new(backend.clone());
    let mailbox = Mailbox::spawn(MailboxOptions::default());
    let shutdown = Shutdown::new();
    let spawner = SessionSpawner::new(
        connector.clone(),
        mailbox.clone(),
        settings,
        dir.to_path_buf(),
        shutdown.clone(),
    );
    let registry = AccountRegistry::new(AccountStore::new(dir), spawner);
    Harness {
        backend,
        connector,
        mailbox,
        shutdown,
        registry,
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Read one CR LF terminated line, failing after two seconds
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    line
}

/// Read lines until one starts with `prefix`; returns that line
pub async fn read_line_starting_with<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    prefix: &str,
) -> String {
    loop {
        let line = read_line(reader).await;
        assert!(!line.is_empty(), "connection closed before {:?}", prefix);
        if line.starts_with(prefix) {
            return line;
        }
    }
}
