//! Store Connection Contract
//!
//! Request/response interface to the remote tuple store. Every back-end
//! (Redis in production, in-process memory for tests) speaks the same small
//! request set so `PollStore` never knows which one it is talking to.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Error types for store calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Store protocol error: {0}")]
    Protocol(String),
}

/// A versioned tuple as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTuple {
    /// Primary key
    pub key: String,
    /// Write counter, bumped on every successful write
    pub version: u64,
    /// Encoded record body
    pub payload: String,
}

impl StoredTuple {
    pub fn new(key: impl Into<String>, version: u64, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version,
            payload: payload.into(),
        }
    }
}

/// Requests understood by every store back-end
#[derive(Debug, Clone)]
pub enum StoreRequest {
    /// Fetch one tuple by key
    Select { key: String },
    /// Insert a tuple, refusing to overwrite an existing key
    Insert { tuple: StoredTuple },
    /// Replace a tuple only if its stored version still matches
    CompareAndSwap {
        tuple: StoredTuple,
        expected_version: u64,
    },
    /// Remove a tuple
    Delete { key: String },
}

impl StoreRequest {
    /// Short operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Insert { .. } => "insert",
            Self::CompareAndSwap { .. } => "compare_and_swap",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Outcome of a compare-and-swap write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    VersionMismatch,
    Missing,
}

/// Responses, one variant per request kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResponse {
    Tuple(Option<StoredTuple>),
    Inserted(bool),
    Swapped(CasOutcome),
    Deleted(bool),
}

impl StoreResponse {
    fn kind(&self) -> &'static str {
        match self {
            Self::Tuple(_) => "tuple",
            Self::Inserted(_) => "inserted",
            Self::Swapped(_) => "swapped",
            Self::Deleted(_) => "deleted",
        }
    }

    /// Build the error returned when a back-end answers with the wrong variant
    pub fn unexpected(self, request: &'static str) -> ConnectionError {
        ConnectionError::Protocol(format!(
            "unexpected {} response to {}",
            self.kind(),
            request
        ))
    }
}

/// Request/response channel to the store
#[async_trait]
pub trait Connection: Send + Sync {
    /// Back-end name identifier
    fn name(&self) -> &str;

    /// Execute one request
    async fn call(&self, request: StoreRequest) -> Result<StoreResponse, ConnectionError>;
}

/// Type-erased connection for injection
pub type DynConnection = Arc<dyn Connection>;
