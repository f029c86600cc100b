// ABOUTME: Backend session: one live, reconnecting connection for one account
// ABOUTME: Caches team/channel topology, replays missed history and streams events into the mailbox

use crate::account::{Account, AccountId};
use crate::config::Config;
use crate::mailbox::{push_bounded, Mailbox};
use crate::model::{
    is_valid_channel_identifier, is_valid_email, is_valid_id, is_valid_team_name,
    is_valid_username, Buddy, CachedChannel, Channel, ChannelType, EventKind, Post, Team, User,
    UserStatus, WebSocketEvent, GROUP_CHAT,
};
use crate::shutdown::Shutdown;
use crate::store::CursorStore;
use crate::text::escape_html;
use crate::traits::{Backend, Connector, EventStream};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// How long `SessionHandle::shutdown` waits for the run loop to finish
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Only these lines are kept in a session's history
const HISTORY_PREFIXES: [&str; 2] = ["chat: msg:", "message:"];

// =============================================================================
// State and settings
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Active,
    Stopped,
}

impl SessionState {
    pub fn is_online(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Drop posts authored by the logged-in user
    pub filter_own: bool,
    pub keep_history: bool,
    /// Max history lines (0 = unbounded)
    pub history_limit: usize,
    pub reconnect_delay: Duration,
    pub login_timeout: Duration,
    pub refresh_timeout: Duration,
    pub backfill_timeout: Duration,
    /// Posts requested per history page
    pub history_batch: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            filter_own: true,
            keep_history: true,
            history_limit: 10_000,
            reconnect_delay: Duration::from_secs(15),
            login_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(60),
            backfill_timeout: Duration::from_secs(300),
            history_batch: 60,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            filter_own: !config.disable_filter_own,
            keep_history: config.history_enabled(),
            history_limit: config.history_limit,
            ..Self::default()
        }
    }
}

/// Joined teams with their channels, in backend order
pub type TeamChannels = Vec<(Team, Vec<CachedChannel>)>;

/// A member of a channel as reported by `chat users`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUser {
    pub id: String,
    pub username: String,
    pub status: String,
}

/// State read by the dispatcher while the run loop writes it
#[derive(Default)]
struct Shared {
    state: SessionState,
    user: Option<User>,
    team_channels: Arc<TeamChannels>,
}

enum LoopExit {
    Stopped,
    Reconnect,
}

// =============================================================================
// Session
// =============================================================================

pub struct Session {
    account_id: AccountId,
    username: String,
    password: String,
    server: String,
    backend: Arc<dyn Backend>,
    mailbox: Mailbox,
    settings: SessionSettings,
    shutdown: Shutdown,
    shared: Mutex<Shared>,
    history: Mutex<VecDeque<String>>,
    cursors: Mutex<CursorStore>,
}

// Custom Debug impl to redact the password
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("server", &self.server)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// The logged-in user, once a login has succeeded
    pub fn own_user(&self) -> Option<User> {
        lock(&self.shared).user.clone()
    }

    pub fn own_username(&self) -> String {
        self.own_user().map(|u| u.username).unwrap_or_default()
    }

    /// Snapshot of the team/channel cache
    pub fn team_channels(&self) -> Arc<TeamChannels> {
        lock(&self.shared).team_channels.clone()
    }

    /// Snapshot of the retained history lines
    pub fn history(&self) -> Vec<String> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Last delivered post id of a channel
    pub fn cursor(&self, channel_id: &str) -> String {
        lock(&self.cursors).get(channel_id).to_string()
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut lock(&self.shared).state, state);
        if previous != state {
            tracing::info!(
                account_id = self.account_id,
                from = previous.as_str(),
                to = state.as_str(),
                "Session state changed"
            );
        }
    }

    fn own_id(&self) -> Option<String> {
        lock(&self.shared).user.as_ref().map(|u| u.id.clone())
    }

    /// Own user id, but only while the session is online
    fn online_user_id(&self) -> Option<String> {
        let shared = lock(&self.shared);
        if !shared.state.is_online() {
            return None;
        }
        shared.user.as_ref().map(|u| u.id.clone())
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    async fn run(self: Arc<Self>, stop: CancellationToken) {
        loop {
            self.set_state(SessionState::Connecting);
            let connected = tokio::select! {
                _ = stop.cancelled() => None,
                result = self.connect() => Some(result),
            };
            let stream = match connected {
                None => break,
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    tracing::warn!(
                        account_id = self.account_id,
                        server = %self.server,
                        error = %format!("{:#}", e),
                        "Connect failed, retrying"
                    );
                    self.set_state(SessionState::Disconnected);
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => continue,
                    }
                }
            };

            match self.event_loop(stream, &stop).await {
                LoopExit::Stopped => break,
                LoopExit::Reconnect => continue,
            }
        }
        self.set_state(SessionState::Stopped);
    }

    /// Log in, rebuild the team/channel cache, replay missed history and open
    /// the event stream. Every step is bounded by a timeout.
    async fn connect(&self) -> Result<EventStream> {
        tracing::info!(account_id = self.account_id, server = %self.server, "Connecting to server");

        let user = tokio::time::timeout(
            self.settings.login_timeout,
            self.backend.login(&self.username, &self.password),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Login timed out"))?
        .context("Login failed")?;
        tracing::info!(account_id = self.account_id, username = %user.username, "Logged in");
        lock(&self.shared).user = Some(user);

        tokio::time::timeout(self.settings.refresh_timeout, self.refresh_team_channels())
            .await
            .map_err(|_| anyhow::anyhow!("Team/channel refresh timed out"))??;

        tokio::time::timeout(self.settings.backfill_timeout, self.resume_history())
            .await
            .map_err(|_| anyhow::anyhow!("History backfill timed out"))?;

        let events = self
            .backend
            .open_event_stream()
            .await
            .context("Failed to open event stream")?;
        self.set_state(SessionState::Active);
        Ok(events)
    }

    async fn event_loop(&self, mut stream: EventStream, stop: &CancellationToken) -> LoopExit {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return LoopExit::Stopped,
                event = stream.events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!(account_id = self.account_id, "Event stream closed, reconnecting");
                        self.set_state(SessionState::Disconnected);
                        return LoopExit::Reconnect;
                    }
                },
                Some(()) = stream.ping_timeouts.recv() => {
                    tracing::warn!(account_id = self.account_id, "Event stream ping timeout");
                }
            }
        }
    }

    // =========================================================================
    // Topology and history
    // =========================================================================

    /// Replace the team/channel cache with the backend's current view
    pub async fn refresh_team_channels(&self) -> Result<()> {
        let own_id = self
            .own_id()
            .ok_or_else(|| anyhow::anyhow!("Not logged in"))?;
        let teams = self
            .backend
            .teams_for_user(&own_id)
            .await
            .context("Failed to list teams")?;

        let mut team_channels = TeamChannels::with_capacity(teams.len());
        for team in teams {
            let channels = self
                .backend
                .channels_for_team_for_user(&team.id, &own_id)
                .await
                .with_context(|| format!("Failed to list channels of team {}", team.id))?;
            let mut cached = Vec::with_capacity(channels.len());
            for channel in channels {
                let channel_name = self.channel_name(&channel).await;
                let name = format!("{} ({})", channel_name, team.display_name);
                cached.push(CachedChannel { channel, name });
            }
            team_channels.push((team, cached));
        }

        tracing::debug!(
            account_id = self.account_id,
            teams = team_channels.len(),
            "Team/channel cache rebuilt"
        );
        lock(&self.shared).team_channels = Arc::new(team_channels);
        Ok(())
    }

    /// Direct channels are named after the other member; others use their display name
    async fn channel_name(&self, channel: &Channel) -> String {
        if channel.channel_type != ChannelType::Direct {
            return channel.display_name.clone();
        }
        let own_id = self.own_id().unwrap_or_default();
        let Some(other) = channel.other_user_id_for_dm(&own_id) else {
            return self.own_username();
        };
        match self.backend.user(&other).await {
            Ok(user) => user.username,
            Err(e) => {
                tracing::warn!(user_id = %other, error = %e, "Failed to look up direct channel member");
                other
            }
        }
    }

    /// Deliver every post newer than each cached channel's cursor
    pub async fn resume_history(&self) {
        let team_channels = self.team_channels();
        for (_, channels) in team_channels.iter() {
            for cached in channels {
                self.resume_channel(&cached.channel.id).await;
            }
        }
    }

    async fn resume_channel(&self, channel_id: &str) {
        let mut after = self.cursor(channel_id);
        loop {
            let posts = match self
                .backend
                .posts_after(channel_id, &after, 0, self.settings.history_batch)
                .await
            {
                Ok(posts) => posts,
                Err(e) => {
                    tracing::warn!(channel_id = %channel_id, error = %e, "Failed to fetch missed posts");
                    return;
                }
            };
            for post in posts.chronological() {
                self.deliver_post(post).await;
                after = post.id.clone();
            }
            if !posts.order.is_empty() {
                self.persist_cursors().await;
            }
            if posts.next_post_id.is_empty() || posts.order.is_empty() {
                break;
            }
        }
    }

    fn add_history(&self, line: &str) {
        if !self.settings.keep_history || !HISTORY_PREFIXES.iter().any(|p| line.starts_with(p)) {
            return;
        }
        push_bounded(
            &mut lock(&self.history),
            line.to_string(),
            self.settings.history_limit,
        );
    }

    /// Re-send the retained history through the mailbox
    pub fn collect_history(&self) {
        if !self.settings.keep_history {
            return;
        }
        for line in self.history() {
            self.mailbox.send(line);
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    async fn handle_event(&self, event: WebSocketEvent) {
        tracing::debug!(account_id = self.account_id, event = %event.event, "Event");
        match event.kind() {
            EventKind::TeamChanged | EventKind::ChannelChanged | EventKind::MembershipChanged => {
                self.refresh_after_event().await
            }
            EventKind::UserRemoved => {
                self.handle_removed(&event).await;
                self.refresh_after_event().await
            }
            EventKind::Posted => match event.post() {
                Ok(post) => self.handle_post(&post).await,
                Err(e) => tracing::warn!(error = %e, "Failed to decode posted event"),
            },
            EventKind::Other => {}
        }
    }

    async fn refresh_after_event(&self) {
        if let Err(e) = self.refresh_team_channels().await {
            tracing::warn!(account_id = self.account_id, error = %format!("{:#}", e), "Cache refresh failed");
        }
    }

    /// Forget the cursor of a channel we were removed from
    async fn handle_removed(&self, event: &WebSocketEvent) {
        let user_id = event.data_str("user_id");
        if !user_id.is_empty() && Some(user_id) != self.own_id().as_deref() {
            return;
        }
        let channel_id = event.data_str("channel_id");
        if channel_id.is_empty() {
            return;
        }
        tracing::info!(account_id = self.account_id, channel_id = %channel_id, "Removed from channel");
        lock(&self.cursors).forget(channel_id);
        self.persist_cursors().await;
    }

    /// Write the cursor file on the blocking pool; a failure is fatal for the daemon
    async fn persist_cursors(&self) {
        let snapshot = lock(&self.cursors).clone();
        let result = tokio::task::spawn_blocking(move || snapshot.save())
            .await
            .context("Cursor writer task failed")
            .and_then(|saved| saved);
        if let Err(e) = result {
            self.shutdown
                .fatal(e.context(format!("Failed to persist cursors of account {}", self.account_id)));
        }
    }

    async fn handle_post(&self, post: &Post) {
        if self.deliver_post(post).await {
            self.persist_cursors().await;
        }
    }

    /// Send a post to the frontend and advance its cursor in memory.
    /// Returns false for filtered own posts.
    async fn deliver_post(&self, post: &Post) -> bool {
        let own_id = self.own_id().unwrap_or_default();
        let own_post = !own_id.is_empty() && post.user_id == own_id;
        if own_post && self.settings.filter_own {
            return false;
        }

        let mut text = post.message.clone();
        let files = self.post_files(post).await;
        if !files.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&files);
        }

        let author = if own_post {
            "<self>".to_string()
        } else {
            match self.backend.user(&post.user_id).await {
                Ok(user) => user.username,
                Err(e) => {
                    tracing::warn!(user_id = %post.user_id, error = %e, "Failed to look up post author");
                    post.user_id.clone()
                }
            }
        };

        tracing::debug!(
            account_id = self.account_id,
            channel_id = %post.channel_id,
            post_id = %post.id,
            "Delivering post"
        );
        let line = format!(
            "chat: msg: {} {} {} {} {}\r\n",
            self.account_id,
            post.channel_id,
            post.create_at / 1000,
            author,
            escape_html(&text)
        );
        self.add_history(&line);
        self.mailbox.send(line);

        lock(&self.cursors).set(&post.channel_id, &post.id);
        true
    }

    /// Attachment block for a post, empty if it has no files
    async fn post_files(&self, post: &Post) -> String {
        let files = post.files();
        if files.is_empty() {
            return String::new();
        }
        let mut block = String::from("---- Attachments:");
        for file in files {
            let link = match self.backend.file_link(&file.id).await {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!(file_id = %file.id, error = %e, "Failed to get file link");
                    continue;
                }
            };
            block.push_str(&format!(
                "\n* Name: {}\n  Type: {}\n  Size: {}B\n  Link: {}",
                file.name, file.mime_type, file.size, link
            ));
        }
        block
    }

    // =========================================================================
    // Lookups: opaque id first, then human-readable name
    // =========================================================================

    /// Empty name means the first cached team
    pub async fn get_team(&self, name: &str) -> Option<Team> {
        if name.is_empty() {
            return self.team_channels().first().map(|(team, _)| team.clone());
        }
        if is_valid_id(name) {
            if let Ok(team) = self.backend.team(name).await {
                return Some(team);
            }
        }
        if is_valid_team_name(name) {
            return self.backend.team_by_name(name).await.ok();
        }
        None
    }

    pub async fn get_channel(&self, team_id: &str, name: &str) -> Option<Channel> {
        if is_valid_id(name) {
            if let Ok(channel) = self.backend.channel(name).await {
                return Some(channel);
            }
        }
        if is_valid_channel_identifier(name) {
            return self.backend.channel_by_name(team_id, name).await.ok();
        }
        None
    }

    /// Resolve a user by id, email address or username
    pub async fn get_user(&self, name: &str) -> Option<User> {
        if is_valid_id(name) {
            if let Ok(user) = self.backend.user(name).await {
                return Some(user);
            }
        }
        if is_valid_email(name) {
            if let Ok(user) = self.backend.user_by_email(name).await {
                return Some(user);
            }
        }
        if is_valid_username(name) {
            return self.backend.user_by_username(name).await.ok();
        }
        None
    }

    /// Resolve the team part of `<team>/<channel>` (or `<channel>`)
    async fn resolve_team<'a>(&self, team_channel: &'a str) -> Option<(Team, &'a str)> {
        let (team_name, channel) = split_team_channel(team_channel)?;
        match self.get_team(team_name).await {
            Some(team) => Some((team, channel)),
            None => {
                tracing::warn!(team = %team_name, requested = %team_channel, "Could not resolve team");
                None
            }
        }
    }

    async fn resolve_team_channel(&self, team_channel: &str) -> Option<Channel> {
        let (team, channel) = self.resolve_team(team_channel).await?;
        let found = self.get_channel(&team.id, channel).await;
        if found.is_none() {
            tracing::warn!(channel = %channel, requested = %team_channel, "Could not resolve channel");
        }
        found
    }

    // =========================================================================
    // Directory operations (no-ops while offline)
    // =========================================================================

    /// Join a channel, creating it as a private channel if it does not exist
    pub async fn join_channel(&self, team_channel: &str) {
        let Some(own_id) = self.online_user_id() else {
            return;
        };
        let Some((team, name)) = self.resolve_team(team_channel).await else {
            return;
        };
        match self.get_channel(&team.id, name).await {
            Some(channel) => {
                if let Err(e) = self.backend.add_channel_member(&channel.id, &own_id).await {
                    tracing::warn!(channel_id = %channel.id, error = %e, "Failed to join channel");
                }
            }
            None => {
                let channel = Channel {
                    team_id: team.id.clone(),
                    channel_type: ChannelType::Private,
                    name: name.to_string(),
                    display_name: name.to_string(),
                    ..Channel::default()
                };
                if let Err(e) = self.backend.create_channel(&channel).await {
                    tracing::warn!(channel = %name, team_id = %team.id, error = %e, "Failed to create channel");
                }
            }
        }
    }

    pub async fn part_channel(&self, team_channel: &str) {
        let Some(own_id) = self.online_user_id() else {
            return;
        };
        let Some(channel) = self.resolve_team_channel(team_channel).await else {
            return;
        };
        if let Err(e) = self.backend.remove_channel_member(&channel.id, &own_id).await {
            tracing::warn!(channel_id = %channel.id, error = %e, "Failed to leave channel");
        }
    }

    /// Add another user to a channel
    pub async fn add_user(&self, team_channel: &str, user: &str) {
        if self.online_user_id().is_none() {
            return;
        }
        let Some(channel) = self.resolve_team_channel(team_channel).await else {
            return;
        };
        let Some(user) = self.get_user(user).await else {
            tracing::warn!(user = %user, "Could not resolve user");
            return;
        };
        if let Err(e) = self.backend.add_channel_member(&channel.id, &user.id).await {
            tracing::warn!(channel_id = %channel.id, user_id = %user.id, error = %e, "Failed to add user");
        }
    }

    /// Own presence; "offline" while disconnected, `None` on backend error
    pub async fn status(&self) -> Option<String> {
        let Some(own_id) = self.online_user_id() else {
            return Some(UserStatus::Offline.to_string());
        };
        match self.backend.user_status(&own_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(account_id = self.account_id, error = %e, "Failed to get status");
                None
            }
        }
    }

    pub async fn set_status(&self, status: UserStatus) {
        let Some(own_id) = self.online_user_id() else {
            return;
        };
        if let Err(e) = self.backend.update_user_status(&own_id, status).await {
            tracing::warn!(account_id = self.account_id, status = %status, error = %e, "Failed to set status");
        }
    }

    /// First page of channel members with name and presence; empty on any error
    pub async fn channel_users(&self, channel_id: &str) -> Vec<ChannelUser> {
        if self.online_user_id().is_none() {
            return Vec::new();
        }
        match self.try_channel_users(channel_id).await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %format!("{:#}", e), "Failed to list channel users");
                Vec::new()
            }
        }
    }

    async fn try_channel_users(&self, channel_id: &str) -> Result<Vec<ChannelUser>> {
        let members = self
            .backend
            .channel_members(channel_id, 0, self.settings.history_batch)
            .await
            .context("Failed to list channel members")?;
        let mut users = Vec::with_capacity(members.len());
        for member in members {
            let user = self.backend.user(&member.user_id).await?;
            let status = self.backend.user_status(&user.id).await?;
            users.push(ChannelUser {
                id: user.id,
                username: user.username,
                status,
            });
        }
        Ok(users)
    }

    /// Every cached channel as a group-chat buddy
    pub fn buddies(&self) -> Vec<Buddy> {
        if !self.is_online() {
            return Vec::new();
        }
        self.team_channels()
            .iter()
            .flat_map(|(_, channels)| channels.iter())
            .map(|cached| Buddy {
                user: cached.channel.id.clone(),
                name: cached.name.clone(),
                status: GROUP_CHAT.to_string(),
            })
            .collect()
    }

    pub async fn send_message(&self, channel_id: &str, message: &str) {
        if !self.is_online() {
            return;
        }
        if let Err(e) = self.backend.create_post(channel_id, message).await {
            tracing::warn!(channel_id = %channel_id, error = %e, "Failed to send message");
        }
    }
}

/// Split `<team>/<channel>` or `<channel>`; anything else is rejected
fn split_team_channel(name: &str) -> Option<(&str, &str)> {
    let mut parts = name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(channel), None, None) => Some(("", channel)),
        (Some(team), Some(channel), None) => Some((team, channel)),
        _ => {
            tracing::warn!(requested = %name, "Malformed team/channel name");
            None
        }
    }
}

// =============================================================================
// Handle and spawner
// =============================================================================

/// A running session plus the means to stop it
pub struct SessionHandle {
    session: Arc<Session>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Ask the run loop to exit at its next suspension point
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Stop and wait (bounded) for the run loop to finish
    pub async fn shutdown(self) {
        self.stop.cancel();
        let account_id = self.session.account_id;
        match tokio::time::timeout(STOP_TIMEOUT, self.task).await {
            Ok(Ok(())) => tracing::debug!(account_id, "Session stopped"),
            Ok(Err(e)) => tracing::error!(account_id, error = %e, "Session task failed"),
            Err(_) => tracing::warn!(account_id, "Session did not stop in time"),
        }
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

/// Builds and starts sessions for accounts of the connector's protocol
#[derive(Clone)]
pub struct SessionSpawner {
    connector: Arc<dyn Connector>,
    mailbox: Mailbox,
    settings: SessionSettings,
    data_dir: PathBuf,
    shutdown: Shutdown,
}

impl SessionSpawner {
    pub fn new(
        connector: Arc<dyn Connector>,
        mailbox: Mailbox,
        settings: SessionSettings,
        data_dir: PathBuf,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            connector,
            mailbox,
            settings,
            data_dir,
            shutdown,
        }
    }

    pub fn supports(&self, protocol: &str) -> bool {
        protocol == self.connector.protocol()
    }

    /// Start a session for `account`. Returns `None` (logged) when the
    /// protocol is unsupported or the account cannot be connected.
    pub fn spawn(&self, account: &Account) -> Option<SessionHandle> {
        if !self.supports(&account.protocol) {
            tracing::debug!(account_id = account.id, protocol = %account.protocol, "No session for protocol");
            return None;
        }
        let Some((username, server)) = account.split_user() else {
            tracing::warn!(account_id = account.id, user = %account.user, "Account user is not <username>@<server>");
            return None;
        };
        let backend = match self.connector.connect(server) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(account_id = account.id, server = %server, error = %e, "Failed to create client");
                return None;
            }
        };

        let session = Arc::new(Session {
            account_id: account.id,
            username: username.to_string(),
            password: account.password.clone(),
            server: server.to_string(),
            backend,
            mailbox: self.mailbox.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
            shared: Mutex::new(Shared::default()),
            history: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(CursorStore::open(&self.data_dir, account.id)),
        });
        let stop = CancellationToken::new();
        let task = tokio::spawn(session.clone().run(stop.clone()));
        tracing::info!(account_id = account.id, server = %server, "Session started");
        Some(SessionHandle {
            session,
            stop,
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_team_channel() {
        assert_eq!(split_team_channel("town-square"), Some(("", "town-square")));
        assert_eq!(split_team_channel("dev/town-square"), Some(("dev", "town-square")));
        assert_eq!(split_team_channel("a/b/c"), None);
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            disable_filter_own: true,
            disable_history: true,
            history_limit: 5,
            ..Config::default()
        };
        let settings = SessionSettings::from_config(&config);
        assert!(!settings.filter_own);
        assert!(!settings.keep_history);
        assert_eq!(settings.history_limit, 5);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(15));
        assert_eq!(settings.history_batch, 60);
    }

    #[test]
    fn test_state_online_only_when_active() {
        assert!(SessionState::Active.is_online());
        assert!(!SessionState::Connecting.is_online());
        assert!(!SessionState::Disconnected.is_online());
        assert!(!SessionState::Stopped.is_online());
    }
}
