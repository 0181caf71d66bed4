//! Chat Platform Channels
//!
//! Capabilities the bot needs from a chat platform:
//! - `MessageSink`: post a message
//! - `EventSource`: subscribe to live events
//!
//! Mattermost is the implemented platform.

pub mod mattermost;
pub mod traits;

pub use mattermost::{BotContext, MattermostClient, MattermostConfig};
pub use traits::{
    ChannelError, ChannelResponse, DynEventSource, DynSink, EventKind, EventSource, EventStream,
    InboundEvent, MessageSink, Post,
};
