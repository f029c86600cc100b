// ABOUTME: Capability traits a chat backend must provide to drive an account session
// ABOUTME: Backend (authenticated REST-style operations + live events) and Connector (client factory)

use crate::model::{Channel, ChannelMember, Post, PostList, Team, User, UserStatus, WebSocketEvent};
use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Live events
// =============================================================================

/// Live event feed of one backend connection.
///
/// The end of `events` is the close signal. `ping_timeouts` fires whenever
/// the keepalive went unanswered; it is informational only.
pub struct EventStream {
    pub events: Pin<Box<dyn Stream<Item = WebSocketEvent> + Send>>,
    pub ping_timeouts: mpsc::Receiver<()>,
    closer: CancellationToken,
}

impl EventStream {
    pub fn new(
        events: Pin<Box<dyn Stream<Item = WebSocketEvent> + Send>>,
        ping_timeouts: mpsc::Receiver<()>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            events,
            ping_timeouts,
            closer,
        }
    }

    /// Build a stream fed by channels; dropping `events`' sender closes it
    pub fn from_channels(
        events: mpsc::Receiver<WebSocketEvent>,
        ping_timeouts: mpsc::Receiver<()>,
        closer: CancellationToken,
    ) -> Self {
        Self::new(Box::pin(ReceiverStream::new(events)), ping_timeouts, closer)
    }

    /// Ask the producer to shut the connection down
    pub fn close(&self) {
        self.closer.cancel();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.closer.cancel();
    }
}

// =============================================================================
// Backend
// =============================================================================

/// One client for one server, owning its own auth token after `login`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Authenticate and return the logged-in user
    async fn login(&self, username: &str, password: &str) -> Result<User>;

    async fn teams_for_user(&self, user_id: &str) -> Result<Vec<Team>>;
    async fn channels_for_team_for_user(&self, team_id: &str, user_id: &str)
        -> Result<Vec<Channel>>;
    async fn team(&self, team_id: &str) -> Result<Team>;
    async fn team_by_name(&self, name: &str) -> Result<Team>;

    async fn channel(&self, channel_id: &str) -> Result<Channel>;
    async fn channel_by_name(&self, team_id: &str, name: &str) -> Result<Channel>;
    async fn create_channel(&self, channel: &Channel) -> Result<Channel>;
    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()>;
    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()>;
    async fn channel_members(
        &self,
        channel_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ChannelMember>>;

    async fn user(&self, user_id: &str) -> Result<User>;
    async fn user_by_email(&self, email: &str) -> Result<User>;
    async fn user_by_username(&self, username: &str) -> Result<User>;
    /// Presence string of a user (e.g. "online")
    async fn user_status(&self, user_id: &str) -> Result<String>;
    async fn update_user_status(&self, user_id: &str, status: UserStatus) -> Result<()>;

    async fn create_post(&self, channel_id: &str, message: &str) -> Result<Post>;
    /// One page of posts strictly after `after` (newest first in `order`).
    /// An empty `next_post_id` means there are no further pages.
    async fn posts_after(
        &self,
        channel_id: &str,
        after: &str,
        page: u32,
        per_page: u32,
    ) -> Result<PostList>;
    /// Public download link of an uploaded file
    async fn file_link(&self, file_id: &str) -> Result<String>;

    async fn open_event_stream(&self) -> Result<EventStream>;
}

/// Creates unauthenticated backend clients for one protocol.
pub trait Connector: Send + Sync {
    /// Protocol label accounts must carry to be started (e.g. "mattermost")
    fn protocol(&self) -> &'static str;

    /// New client for `server` (`host[:port]`)
    fn connect(&self, server: &str) -> Result<Arc<dyn Backend>>;
}
