// ABOUTME: Data types exchanged with a chat backend (teams, channels, users, posts, events)
// ABOUTME: Serde shapes follow the Mattermost v4 JSON API; includes identifier validators

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Directory objects
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// Channel visibility as encoded by the backend (`O`, `P`, `D`, `G`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    #[serde(rename = "O")]
    #[default]
    Open,
    #[serde(rename = "P")]
    Private,
    #[serde(rename = "D")]
    Direct,
    #[serde(rename = "G")]
    Group,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

impl Channel {
    /// For a direct channel (`<user>__<user>`) return the member that is not
    /// `own_id`; `None` for a self-chat or any other channel type
    pub fn other_user_id_for_dm(&self, own_id: &str) -> Option<String> {
        if self.channel_type != ChannelType::Direct {
            return None;
        }
        self.name
            .split("__")
            .filter(|id| *id != own_id && !id.is_empty())
            .last()
            .map(str::to_string)
    }
}

/// A joined channel together with the display name shown to the frontend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChannel {
    pub channel: Channel,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
}

/// Presence values a frontend may set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Online,
    Away,
    Offline,
    Dnd,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Away => "away",
            UserStatus::Offline => "offline",
            UserStatus::Dnd => "dnd",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(UserStatus::Online),
            "away" => Ok(UserStatus::Away),
            "offline" => Ok(UserStatus::Offline),
            "dnd" => Ok(UserStatus::Dnd),
            other => anyhow::bail!("Unsupported status '{}'", other),
        }
    }
}

/// A channel entry as listed by `buddies` and `chat list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buddy {
    pub user: String,
    pub name: String,
    pub status: String,
}

/// Group-chat buddy status used for every cached channel
pub const GROUP_CHAT: &str = "GROUP_CHAT";

// =============================================================================
// Posts
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PostMetadata>,
}

impl Post {
    pub fn files(&self) -> &[FileInfo] {
        self.metadata.as_ref().map(|m| m.files.as_slice()).unwrap_or(&[])
    }
}

/// One page of posts. `order` lists post ids newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostList {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub posts: HashMap<String, Post>,
    #[serde(default)]
    pub next_post_id: String,
    #[serde(default)]
    pub prev_post_id: String,
}

impl PostList {
    /// Posts in chronological (oldest first) order
    pub fn chronological(&self) -> impl Iterator<Item = &Post> {
        self.order.iter().rev().filter_map(|id| self.posts.get(id))
    }
}

// =============================================================================
// Live events
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSocketEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// What a live event means for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TeamChanged,
    ChannelChanged,
    MembershipChanged,
    UserRemoved,
    Posted,
    Other,
}

impl WebSocketEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        match self.event.as_str() {
            "added_to_team" | "leave_team" | "update_team" | "delete_team" | "restore_team" => {
                EventKind::TeamChanged
            }
            "channel_converted" | "channel_created" | "channel_deleted" | "channel_updated"
            | "channel_member_updated" => EventKind::ChannelChanged,
            "user_added" | "user_updated" | "user_role_updated" | "memberrole_updated" => {
                EventKind::MembershipChanged
            }
            "user_removed" => EventKind::UserRemoved,
            "posted" => EventKind::Posted,
            _ => EventKind::Other,
        }
    }

    /// String value of a data field, empty when missing or not a string
    pub fn data_str(&self, key: &str) -> &str {
        self.data.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Decode the post embedded (as a JSON string) in a `posted` event
    pub fn post(&self) -> anyhow::Result<Post> {
        let raw = self
            .data
            .get("post")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("posted event without post payload"))?;
        Ok(serde_json::from_str(raw)?)
    }
}

// =============================================================================
// Identifier validators
// =============================================================================

/// Backend-issued opaque ids are 26 lowercase alphanumerics
pub fn is_valid_id(s: &str) -> bool {
    s.len() == 26 && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

pub fn is_valid_team_name(s: &str) -> bool {
    (2..=64).contains(&s.len())
        && s.starts_with(|c: char| c.is_ascii_lowercase())
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn is_valid_channel_identifier(s: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    (1..=64).contains(&s.len())
        && s.starts_with(alnum)
        && s.ends_with(alnum)
        && s.chars().all(|c| alnum(c) || c == '-' || c == '_')
}

pub fn is_valid_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !s.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

pub fn is_valid_username(s: &str) -> bool {
    (3..=22).contains(&s.len())
        && s.starts_with(|c: char| c.is_ascii_lowercase())
        && s.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' || c == '_'
        })
}
