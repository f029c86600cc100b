// ABOUTME: HTTP client for the Mattermost REST API v4, one instance per account session
// ABOUTME: Stores the session token from login and turns API errors into readable messages

use super::websocket;
use anyhow::{Context, Result};
use async_trait::async_trait;
use mattermostd_core::model::{
    Channel, ChannelMember, Post, PostList, Team, User, UserStatus,
};
use mattermostd_core::{Backend, EventStream};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Mutex, PoisonError};

/// Error body returned by the server (`AppError`)
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct FileLinkResponse {
    link: String,
}

pub struct MattermostClient {
    server: String,
    api_url: String,
    websocket_url: String,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
}

// Custom Debug impl to redact the session token
impl std::fmt::Debug for MattermostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattermostClient")
            .field("server", &self.server)
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

impl MattermostClient {
    /// Client for `server` (host[:port]); plain http/ws if `disable_encryption`
    pub fn new(http: reqwest::Client, server: &str, disable_encryption: bool) -> Self {
        let (http_prefix, ws_prefix) = if disable_encryption {
            ("http://", "ws://")
        } else {
            ("https://", "wss://")
        };
        Self {
            server: server.to_string(),
            api_url: format!("{}{}/api/v4", http_prefix, server),
            websocket_url: format!("{}{}/api/v4/websocket", ws_prefix, server),
            http,
            token: Mutex::new(None),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.api_url, path));
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and fail on any non-success status, keeping the server's message
    async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.context("Request failed")?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(err) if !err.message.is_empty() => {
                anyhow::bail!("{}: {} ({})", status, err.message, err.id)
            }
            _ => anyhow::bail!("{}: {}", status, body.trim()),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(self.request(Method::GET, path)).await?;
        response
            .json()
            .await
            .with_context(|| format!("Invalid response from GET {}", path))
    }
}

#[async_trait]
impl Backend for MattermostClient {
    async fn login(&self, username: &str, password: &str) -> Result<User> {
        let builder = self
            .request(Method::POST, "/users/login")
            .json(&json!({ "login_id": username, "password": password }));
        let response = self.execute(builder).await?;
        let token = response
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Login response without session token"))?;
        let user: User = response.json().await.context("Invalid login response")?;
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        tracing::debug!(server = %self.server, user_id = %user.id, "Session token stored");
        Ok(user)
    }

    async fn teams_for_user(&self, user_id: &str) -> Result<Vec<Team>> {
        self.get(&format!("/users/{}/teams", segment(user_id))).await
    }

    async fn channels_for_team_for_user(&self, team_id: &str, user_id: &str) -> Result<Vec<Channel>> {
        self.get(&format!(
            "/users/{}/teams/{}/channels",
            segment(user_id),
            segment(team_id)
        ))
        .await
    }

    async fn team(&self, team_id: &str) -> Result<Team> {
        self.get(&format!("/teams/{}", segment(team_id))).await
    }

    async fn team_by_name(&self, name: &str) -> Result<Team> {
        self.get(&format!("/teams/name/{}", segment(name))).await
    }

    async fn channel(&self, channel_id: &str) -> Result<Channel> {
        self.get(&format!("/channels/{}", segment(channel_id))).await
    }

    async fn channel_by_name(&self, team_id: &str, name: &str) -> Result<Channel> {
        self.get(&format!(
            "/teams/{}/channels/name/{}",
            segment(team_id),
            segment(name)
        ))
        .await
    }

    async fn create_channel(&self, channel: &Channel) -> Result<Channel> {
        let builder = self.request(Method::POST, "/channels").json(&json!({
            "team_id": channel.team_id,
            "name": channel.name,
            "display_name": channel.display_name,
            "type": channel.channel_type,
        }));
        let response = self.execute(builder).await?;
        response.json().await.context("Invalid create channel response")
    }

    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()> {
        let builder = self
            .request(Method::POST, &format!("/channels/{}/members", segment(channel_id)))
            .json(&json!({ "user_id": user_id }));
        self.execute(builder).await?;
        Ok(())
    }

    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<()> {
        let path = format!(
            "/channels/{}/members/{}",
            segment(channel_id),
            segment(user_id)
        );
        self.execute(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn channel_members(&self, channel_id: &str, page: u32, per_page: u32) -> Result<Vec<ChannelMember>> {
        self.get(&format!(
            "/channels/{}/members?page={}&per_page={}",
            segment(channel_id),
            page,
            per_page
        ))
        .await
    }

    async fn user(&self, user_id: &str) -> Result<User> {
        self.get(&format!("/users/{}", segment(user_id))).await
    }

    async fn user_by_email(&self, email: &str) -> Result<User> {
        self.get(&format!("/users/email/{}", segment(email))).await
    }

    async fn user_by_username(&self, username: &str) -> Result<User> {
        self.get(&format!("/users/username/{}", segment(username))).await
    }

    async fn user_status(&self, user_id: &str) -> Result<String> {
        let status: StatusResponse = self
            .get(&format!("/users/{}/status", segment(user_id)))
            .await?;
        Ok(status.status)
    }

    async fn update_user_status(&self, user_id: &str, status: UserStatus) -> Result<()> {
        let builder = self
            .request(Method::PUT, &format!("/users/{}/status", segment(user_id)))
            .json(&json!({ "user_id": user_id, "status": status.as_str() }));
        self.execute(builder).await?;
        Ok(())
    }

    async fn create_post(&self, channel_id: &str, message: &str) -> Result<Post> {
        let builder = self
            .request(Method::POST, "/posts")
            .json(&json!({ "channel_id": channel_id, "message": message }));
        let response = self.execute(builder).await?;
        response.json().await.context("Invalid create post response")
    }

    async fn posts_after(&self, channel_id: &str, after: &str, page: u32, per_page: u32) -> Result<PostList> {
        let builder = self
            .request(Method::GET, &format!("/channels/{}/posts", segment(channel_id)))
            .query(&[
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
                ("after", after.to_string()),
            ]);
        let response = self.execute(builder).await?;
        response.json().await.context("Invalid post list response")
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        let link: FileLinkResponse = self
            .get(&format!("/files/{}/link", segment(file_id)))
            .await?;
        Ok(link.link)
    }

    async fn open_event_stream(&self) -> Result<EventStream> {
        let token = self
            .token()
            .ok_or_else(|| anyhow::anyhow!("Not logged in"))?;
        websocket::connect(&self.websocket_url, &token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_follow_encryption_setting() {
        let secure = MattermostClient::new(reqwest::Client::new(), "chat.example.org", false);
        assert_eq!(secure.api_url(), "https://chat.example.org/api/v4");
        assert_eq!(secure.websocket_url(), "wss://chat.example.org/api/v4/websocket");

        let plain = MattermostClient::new(reqwest::Client::new(), "localhost:8065", true);
        assert_eq!(plain.api_url(), "http://localhost:8065/api/v4");
        assert_eq!(plain.websocket_url(), "ws://localhost:8065/api/v4/websocket");
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = MattermostClient::new(reqwest::Client::new(), "s", false);
        *client.token.lock().unwrap() = Some("secret-token".to_string());
        let debug = format!("{:?}", client);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_path_segments_are_escaped() {
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
        assert_eq!(segment("alice@example.org"), "alice%40example.org");
    }
}
