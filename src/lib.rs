//! Pollbot
//!
//! Chat poll bot: members of a channel create polls, vote and read results
//! through `/poll` commands.
//!
//! # Features
//!
//! - **Atomic Votes**: per-poll locking plus version-checked writes
//! - **Remote Store**: Redis tuples behind a request/response `Connection`
//! - **Resilient Ingestion**: websocket events with reconnect and backoff
//! - **Bounded Concurrency**: semaphore-capped command tasks
//!
//! # Architecture
//!
//! ```text
//! Mattermost ──► IngestionLoop ──► CommandRouter ──► PollStore ──► Connection
//!  (websocket)      │                   │                            │
//!                   └── filters         ├── Parser                   ├── Redis
//!                                       └── reply ──► MessageSink    └── Memory
//! ```

pub mod channels;
pub mod config;
pub mod ingest;
pub mod parser;
pub mod polls;
pub mod router;
pub mod store;

pub use channels::{ChannelError, ChannelResponse, EventSource, InboundEvent, MessageSink, Post};
pub use config::Config;
pub use ingest::{IngestionConfig, IngestionLoop, IngestionState};
pub use parser::{parse_arguments, tokenize, Invocation, Subcommand};
pub use polls::{PollError, PollRecord, PollResults, PollStore};
pub use router::{CommandRouter, RouterConfig};
pub use store::{Connection, ConnectionError, MemoryConnection, RedisConnection};
