//! Configuration management

use crate::channels::MattermostConfig;
use crate::store::RedisConfig;
use anyhow::Result;
use std::time::Duration;

/// Store URL that selects the in-process store instead of Redis
pub const MEMORY_STORE_URL: &str = "memory://";

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat server connection
    pub mattermost: MattermostConfig,

    /// Remote store connection
    pub store: RedisConfig,

    /// Only the creator may stop or delete a poll
    pub owner_only: bool,

    /// Maximum concurrently running command tasks
    pub max_in_flight: usize,

    /// Delay between failed event subscription attempts
    pub reconnect_backoff: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mattermost = MattermostConfig::from_env()?;

        let defaults = RedisConfig::default();
        let store = RedisConfig {
            url: std::env::var("STORE_URL").unwrap_or(defaults.url),
            username: std::env::var("STORE_USERNAME").ok().filter(|s| !s.is_empty()),
            password: std::env::var("STORE_PASSWORD").ok().filter(|s| !s.is_empty()),
            connect_timeout: env_millis("STORE_CONNECT_TIMEOUT_MS").unwrap_or(defaults.connect_timeout),
            call_timeout: env_millis("STORE_CALL_TIMEOUT_MS").unwrap_or(defaults.call_timeout),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        };

        let owner_only = std::env::var("POLL_OWNER_ONLY")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let max_in_flight = std::env::var("POLL_MAX_IN_FLIGHT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(32);

        let reconnect_backoff =
            env_millis("POLL_RECONNECT_BACKOFF_MS").unwrap_or(Duration::from_secs(2));

        Ok(Self {
            mattermost,
            store,
            owner_only,
            max_in_flight,
            reconnect_backoff,
        })
    }

    /// Whether the in-process store was requested
    pub fn uses_memory_store(&self) -> bool {
        self.store.url == MEMORY_STORE_URL
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off")
}
