//! Channel Trait Definitions
//!
//! The two capabilities the bot needs from a chat platform: posting a
//! message, and subscribing to the stream of platform events.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Error types for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Event type enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A new message was posted
    Posted,
    /// Any other platform event
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "posted" => Self::Posted,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Posted => write!(f, "posted"),
            EventKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A chat message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Unique message ID
    pub id: String,

    /// Author user ID
    pub user_id: String,

    /// Channel the message was posted in
    pub channel_id: String,

    /// Message text
    pub message: String,

    /// Thread root, empty when the message starts a thread
    #[serde(default)]
    pub root_id: String,
}

impl Post {
    /// Create a simple text post
    pub fn text(id: &str, user_id: &str, channel_id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            message: message.to_string(),
            root_id: String::new(),
        }
    }

    /// Root of the thread this post belongs to; replies must name the root,
    /// never a post that is itself a reply
    pub fn thread_root(&self) -> &str {
        if self.root_id.is_empty() {
            &self.id
        } else {
            &self.root_id
        }
    }
}

/// Inbound platform event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub kind: EventKind,

    /// Channel the event was broadcast to (empty for non-channel events)
    pub channel_id: String,

    /// Message payload for `Posted` events
    pub post: Option<Post>,
}

impl InboundEvent {
    /// A `posted` event carrying `post`
    pub fn posted(post: Post) -> Self {
        Self {
            kind: EventKind::Posted,
            channel_id: post.channel_id.clone(),
            post: Some(post),
        }
    }

    /// A payload-less event of another kind
    pub fn other(kind: &str, channel_id: &str) -> Self {
        Self {
            kind: EventKind::from_name(kind),
            channel_id: channel_id.to_string(),
            post: None,
        }
    }
}

/// Response to send back through the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResponse {
    /// Target channel ID
    pub channel_id: String,

    /// Response content
    pub content: String,

    /// Reply to specific message (thread root)
    pub reply_to: Option<String>,
}

impl ChannelResponse {
    pub fn text(channel_id: &str, content: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            reply_to: None,
        }
    }

    pub fn with_reply(mut self, reply_to: &str) -> Self {
        if !reply_to.is_empty() {
            self.reply_to = Some(reply_to.to_string());
        }
        self
    }
}

/// Live event subscription; ends or yields an error when the connection drops
pub type EventStream = BoxStream<'static, Result<InboundEvent, ChannelError>>;

/// Outbound capability: post a message
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send a response, returning the platform's message ID
    async fn send(&self, response: ChannelResponse) -> Result<String, ChannelError>;
}

/// Inbound capability: subscribe to platform events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new live subscription
    async fn subscribe(&self) -> Result<EventStream, ChannelError>;
}

pub type DynSink = Arc<dyn MessageSink>;
pub type DynEventSource = Arc<dyn EventSource>;
