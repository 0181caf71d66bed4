//! Redis Store Connection
//!
//! Production `Connection` over a single multiplexed Redis connection.
//!
//! Each tuple is a hash `<prefix><key>` with two fields:
//! - `version`: write counter checked by compare-and-swap
//! - `data`: the encoded record
//!
//! Insert and compare-and-swap run as Lua scripts so each is one atomic step
//! on the server. Reconnection after a dropped socket is handled by
//! `ConnectionManager`; every call carries its own timeout.

use super::connection::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, RedisError, Script};
use std::time::Duration;
use tracing::{debug, info};

static INSERT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[1], 'version', ARGV[1], 'data', ARGV[2])
return 1
"#,
    )
});

static CAS_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then return -1 end
if current ~= ARGV[1] then return 0 end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'data', ARGV[3])
return 1
"#,
    )
});

/// Redis store configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server URL (`redis://host:port/db`)
    pub url: String,
    /// ACL user name
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Bound on the initial connect
    pub connect_timeout: Duration,
    /// Bound on every call
    pub call_timeout: Duration,
    /// Prefix prepended to every tuple key
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(1),
            key_prefix: "pollbot:poll:".to_string(),
        }
    }
}

/// Redis-backed store connection
#[derive(Clone)]
pub struct RedisConnection {
    manager: ConnectionManager,
    call_timeout: Duration,
    key_prefix: String,
}

impl RedisConnection {
    /// Connect within `config.connect_timeout`.
    ///
    /// Failure here is fatal for the bot: there is no poll functionality
    /// without a store.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .context("Invalid store URL")?;
        if config.username.is_some() {
            info.redis.username = config.username.clone();
        }
        if config.password.is_some() {
            info.redis.password = config.password.clone();
        }

        let client = redis::Client::open(info).context("Invalid store connection info")?;

        let manager = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| ConnectionError::Timeout(config.connect_timeout))
            .context("Store connection timed out")?
            .map_err(|e| classify(e, config.connect_timeout))
            .context("Store connection failed")?;

        info!(url = %config.url, "Connected to store");

        Ok(Self {
            manager,
            call_timeout: config.call_timeout,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse, RedisError> {
        let mut conn = self.manager.clone();

        match request {
            StoreRequest::Select { key } => {
                let (version, data): (Option<u64>, Option<String>) = redis::cmd("HMGET")
                    .arg(self.full_key(&key))
                    .arg("version")
                    .arg("data")
                    .query_async(&mut conn)
                    .await?;

                let tuple = match (version, data) {
                    (Some(version), Some(payload)) => Some(StoredTuple::new(key, version, payload)),
                    _ => None,
                };
                Ok(StoreResponse::Tuple(tuple))
            }
            StoreRequest::Insert { tuple } => {
                let inserted: i64 = INSERT_SCRIPT
                    .key(self.full_key(&tuple.key))
                    .arg(tuple.version)
                    .arg(&tuple.payload)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(StoreResponse::Inserted(inserted == 1))
            }
            StoreRequest::CompareAndSwap {
                tuple,
                expected_version,
            } => {
                let outcome: i64 = CAS_SCRIPT
                    .key(self.full_key(&tuple.key))
                    .arg(expected_version)
                    .arg(tuple.version)
                    .arg(&tuple.payload)
                    .invoke_async(&mut conn)
                    .await?;
                let outcome = match outcome {
                    1 => CasOutcome::Swapped,
                    0 => CasOutcome::VersionMismatch,
                    _ => CasOutcome::Missing,
                };
                Ok(StoreResponse::Swapped(outcome))
            }
            StoreRequest::Delete { key } => {
                let removed: i64 = redis::cmd("DEL")
                    .arg(self.full_key(&key))
                    .query_async(&mut conn)
                    .await?;
                Ok(StoreResponse::Deleted(removed > 0))
            }
        }
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn name(&self) -> &str {
        "redis"
    }

    async fn call(&self, request: StoreRequest) -> Result<StoreResponse, ConnectionError> {
        let op = request.name();
        debug!(op, "Store call");

        match tokio::time::timeout(self.call_timeout, self.execute(request)).await {
            Ok(result) => result.map_err(|e| classify(e, self.call_timeout)),
            Err(_) => Err(ConnectionError::Timeout(self.call_timeout)),
        }
    }
}

/// Map a Redis error onto the connection error taxonomy. `deadline` is the
/// bound that applied to the failed operation.
fn classify(err: RedisError, deadline: Duration) -> ConnectionError {
    if err.is_timeout() {
        ConnectionError::Timeout(deadline)
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        ConnectionError::Unreachable(err.to_string())
    } else {
        ConnectionError::Protocol(err.to_string())
    }
}
