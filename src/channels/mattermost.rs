//! Mattermost Channel Implementation
//!
//! REST API v4 over reqwest for lookups and posting, websocket for events.
//!
//! # Configuration
//!
//! Environment variables:
//! - `MM_SERVER`: server base URL (`https://chat.example.com`)
//! - `MM_TOKEN`: bot access token
//! - `MM_TEAM`: team name
//! - `MM_CHANNEL`: channel name the bot listens and replies in
//! - `MM_USERNAME`: bot user name (informational)

use super::traits::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Mattermost channel configuration
#[derive(Debug, Clone)]
pub struct MattermostConfig {
    /// Server base URL
    pub server_url: Url,
    /// Bot access token
    pub token: String,
    /// Team name
    pub team: String,
    /// Channel name
    pub channel: String,
    /// Bot user name
    pub username: String,
}

impl MattermostConfig {
    /// Load from environment
    pub fn from_env() -> Result<Self> {
        let server = std::env::var("MM_SERVER").context("MM_SERVER not set")?;

        Ok(Self {
            server_url: Url::parse(&server).context("MM_SERVER is not a valid URL")?,
            token: std::env::var("MM_TOKEN").context("MM_TOKEN not set")?,
            team: std::env::var("MM_TEAM").context("MM_TEAM not set")?,
            channel: std::env::var("MM_CHANNEL").context("MM_CHANNEL not set")?,
            username: std::env::var("MM_USERNAME").unwrap_or_default(),
        })
    }
}

/// Mattermost user
#[derive(Debug, Clone, Deserialize)]
pub struct MattermostUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
}

/// Mattermost team
#[derive(Debug, Clone, Deserialize)]
pub struct MattermostTeam {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Mattermost channel
#[derive(Debug, Clone, Deserialize)]
pub struct MattermostChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Everything resolved at login
#[derive(Debug, Clone)]
pub struct BotContext {
    pub user: MattermostUser,
    pub team: MattermostTeam,
    pub channel: MattermostChannelInfo,
}

/// Mattermost API client
#[derive(Clone)]
pub struct MattermostClient {
    config: MattermostConfig,
    client: reqwest::Client,
}

impl MattermostClient {
    pub fn new(config: MattermostConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &MattermostConfig {
        &self.config
    }

    /// Verify the token and resolve the bot user, team and channel.
    pub async fn login(&self) -> Result<BotContext> {
        let user = self
            .current_user()
            .await
            .context("Could not log in")?;
        info!(user_id = %user.id, username = %user.username, "Logged in to Mattermost");

        let team = self
            .team_by_name(&self.config.team)
            .await
            .context("Could not find team. Is this bot a member?")?;
        debug!(team_id = %team.id, "Resolved team");

        let channel = self
            .channel_by_name(&team.id, &self.config.channel)
            .await
            .context("Could not find channel. Is this bot added to that channel?")?;
        debug!(channel_id = %channel.id, "Resolved channel");

        Ok(BotContext {
            user,
            team,
            channel,
        })
    }

    pub async fn current_user(&self) -> Result<MattermostUser, ChannelError> {
        self.get_json("/users/me").await
    }

    pub async fn team_by_name(&self, name: &str) -> Result<MattermostTeam, ChannelError> {
        self.get_json(&format!("/teams/name/{}", name)).await
    }

    pub async fn channel_by_name(
        &self,
        team_id: &str,
        name: &str,
    ) -> Result<MattermostChannelInfo, ChannelError> {
        self.get_json(&format!("/teams/{}/channels/name/{}", team_id, name))
            .await
    }

    /// Create a post, returning its ID
    pub async fn create_post(
        &self,
        channel_id: &str,
        message: &str,
        root_id: Option<&str>,
    ) -> Result<String, ChannelError> {
        let payload = serde_json::json!({
            "channel_id": channel_id,
            "message": message,
            "root_id": root_id.unwrap_or_default(),
        });

        let response = self
            .client
            .post(self.api_url("/posts"))
            .bearer_auth(&self.config.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let post: Post = Self::read_json(response, "/posts").await?;
        Ok(post.id)
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4{}",
            self.config.server_url.as_str().trim_end_matches('/'),
            path
        )
    }

    /// Websocket endpoint derived from the server URL
    pub fn websocket_url(&self) -> String {
        let url = &self.config.server_url;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();

        format!(
            "{}://{}{}{}/api/v4/websocket",
            scheme,
            url.host_str().unwrap_or_default(),
            port,
            url.path().trim_end_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChannelError> {
        let response = self
            .client
            .get(self.api_url(path))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        Self::read_json(response, path).await
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> Result<T, ChannelError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ChannelError::Protocol(e.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ChannelError::AuthenticationFailed(error_text))
            }
            StatusCode::NOT_FOUND => Err(ChannelError::NotFound(path.to_string())),
            _ => Err(ChannelError::Protocol(format!(
                "Mattermost error {}: {}",
                status, error_text
            ))),
        }
    }
}

#[async_trait]
impl MessageSink for MattermostClient {
    async fn send(&self, response: ChannelResponse) -> Result<String, ChannelError> {
        self.create_post(
            &response.channel_id,
            &response.content,
            response.reply_to.as_deref(),
        )
        .await
    }
}

#[async_trait]
impl EventSource for MattermostClient {
    async fn subscribe(&self) -> Result<EventStream, ChannelError> {
        let mut request = self
            .websocket_url()
            .into_client_request()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.token))
            .map_err(|e| ChannelError::AuthenticationFailed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let events = ws.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => match parse_event(text.as_str()) {
                    Ok(event) => event.map(Ok),
                    Err(e) => {
                        warn!("Dropping undecodable Mattermost event: {}", e);
                        None
                    }
                },
                Ok(Message::Close(_)) => Some(Err(ChannelError::ConnectionFailed(
                    "websocket closed by server".to_string(),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::ConnectionFailed(e.to_string()))),
            }
        });

        Ok(events.boxed())
    }
}

/// Websocket frame envelope
#[derive(Debug, Deserialize)]
struct WsFrame {
    /// Absent on replies to client actions
    event: Option<String>,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    broadcast: WsBroadcast,
}

#[derive(Debug, Default, Deserialize)]
struct WsBroadcast {
    #[serde(default)]
    channel_id: String,
}

/// Decode one websocket text frame. Replies to client actions (no `event`
/// field) decode to `None`.
pub fn parse_event(text: &str) -> Result<Option<InboundEvent>, ChannelError> {
    let frame: WsFrame =
        serde_json::from_str(text).map_err(|e| ChannelError::Protocol(e.to_string()))?;

    let Some(name) = frame.event else {
        return Ok(None);
    };

    let kind = EventKind::from_name(&name);
    let post = match kind {
        EventKind::Posted => {
            let raw = frame
                .data
                .get("post")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ChannelError::Protocol("posted event without post".to_string()))?;
            let post: Post =
                serde_json::from_str(raw).map_err(|e| ChannelError::Protocol(e.to_string()))?;
            Some(post)
        }
        EventKind::Other(_) => None,
    };

    Ok(Some(InboundEvent {
        kind,
        channel_id: frame.broadcast.channel_id,
        post,
    }))
}
