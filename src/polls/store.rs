//! Poll Store
//!
//! CRUD and vote aggregation over poll records held in the remote store.
//!
//! Mutations on one poll are serialized two ways:
//! - a per-poll async mutex orders writers inside this process
//! - a compare-and-swap on the record version rejects writes that raced a
//!   writer outside this process, retried up to `max_cas_attempts`

use super::model::{generate_poll_id, PollRecord, PollResults};
use crate::store::{CasOutcome, ConnectionError, DynConnection, StoreRequest, StoreResponse, StoredTuple};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Default number of compare-and-swap attempts per mutation
pub const DEFAULT_CAS_ATTEMPTS: u32 = 5;

/// Insert attempts when a generated ID is already taken
const CREATE_ATTEMPTS: u32 = 3;

/// Error types for poll operations
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Poll not found: {0}")]
    NotFound(String),

    #[error("Invalid option {index}: poll has {count} options")]
    InvalidOption { index: i64, count: usize },

    #[error("Poll already stopped: {0}")]
    AlreadyStopped(String),

    #[error("Poll is closed: {0}")]
    Closed(String),

    #[error("Poll {id} kept changing, gave up after {attempts} attempts")]
    Conflict { id: String, attempts: u32 },

    #[error("Invalid poll: {0}")]
    Invalid(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] ConnectionError),
}

// ============ Per-Poll Locks ============

type LockTable = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Table of per-poll async mutexes. Entries exist only while some task holds
/// or awaits the lock.
#[derive(Default, Clone)]
pub struct PollLocks {
    table: LockTable,
}

impl PollLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one poll
    pub async fn acquire(&self, poll_id: &str) -> PollGuard {
        let lock = {
            let mut table = self.table.lock();
            table.entry(poll_id.to_string()).or_default().clone()
        };

        let guard = lock.lock_owned().await;

        PollGuard {
            poll_id: poll_id.to_string(),
            table: self.table.clone(),
            _guard: guard,
        }
    }

    /// Number of polls with a live lock entry
    pub fn tracked(&self) -> usize {
        self.table.lock().len()
    }
}

/// Exclusive access to one poll; prunes its table entry on release when
/// nobody else is waiting
pub struct PollGuard {
    poll_id: String,
    table: LockTable,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // One reference in the table, one inside our guard
        let idle = table
            .get(&self.poll_id)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false);
        if idle {
            table.remove(&self.poll_id);
        }
    }
}

// ============ Store ============

/// Poll store over an injected connection
#[derive(Clone)]
pub struct PollStore {
    conn: DynConnection,
    locks: PollLocks,
    max_cas_attempts: u32,
}

impl PollStore {
    pub fn new(conn: DynConnection) -> Self {
        Self::with_cas_attempts(conn, DEFAULT_CAS_ATTEMPTS)
    }

    pub fn with_cas_attempts(conn: DynConnection, max_cas_attempts: u32) -> Self {
        Self {
            conn,
            locks: PollLocks::new(),
            max_cas_attempts: max_cas_attempts.max(1),
        }
    }

    /// Lock table, exposed for diagnostics
    pub fn locks(&self) -> &PollLocks {
        &self.locks
    }

    /// Create a poll and return its ID
    pub async fn create(
        &self,
        creator_id: &str,
        title: &str,
        options: Vec<String>,
    ) -> Result<String, PollError> {
        if title.trim().is_empty() {
            return Err(PollError::Invalid("title is empty".to_string()));
        }
        if options.is_empty() {
            return Err(PollError::Invalid("at least one option is required".to_string()));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(PollError::Invalid("options must not be empty".to_string()));
        }

        for attempt in 1..=CREATE_ATTEMPTS {
            let poll_id = generate_poll_id();
            let record = PollRecord::new(&poll_id, creator_id, title, options.clone());
            let tuple = encode(&record, record.version)?;

            match self.conn.call(StoreRequest::Insert { tuple }).await? {
                StoreResponse::Inserted(true) => {
                    info!(poll_id = %poll_id, creator = %creator_id, "Poll created");
                    return Ok(poll_id);
                }
                StoreResponse::Inserted(false) => {
                    warn!(poll_id = %poll_id, attempt, "Poll ID already taken, regenerating");
                }
                other => return Err(other.unexpected("insert").into()),
            }
        }

        Err(PollError::Conflict {
            id: "<new>".to_string(),
            attempts: CREATE_ATTEMPTS,
        })
    }

    /// Fetch the full record
    pub async fn fetch(&self, poll_id: &str) -> Result<PollRecord, PollError> {
        match self
            .conn
            .call(StoreRequest::Select {
                key: poll_id.to_string(),
            })
            .await?
        {
            StoreResponse::Tuple(Some(tuple)) => decode(&tuple),
            StoreResponse::Tuple(None) => Err(PollError::NotFound(poll_id.to_string())),
            other => Err(other.unexpected("select").into()),
        }
    }

    /// Record one vote for a 0-based option index
    pub async fn vote(&self, poll_id: &str, option_index: i64) -> Result<PollRecord, PollError> {
        let record = self
            .mutate(poll_id, |poll| {
                let count = poll.options.len();
                let index = usize::try_from(option_index)
                    .ok()
                    .filter(|&i| i < count)
                    .ok_or(PollError::InvalidOption {
                        index: option_index,
                        count,
                    })?;

                if !poll.active {
                    return Err(PollError::Closed(poll.id.clone()));
                }

                *poll.tally.entry(index).or_insert(0) += 1;
                Ok(())
            })
            .await?;

        debug!(poll_id = %poll_id, option = option_index, "Vote recorded");
        Ok(record)
    }

    /// Per-option counts and percentages
    pub async fn show(&self, poll_id: &str) -> Result<PollResults, PollError> {
        Ok(self.fetch(poll_id).await?.results())
    }

    /// Close a poll to further votes
    pub async fn stop(&self, poll_id: &str) -> Result<(), PollError> {
        self.mutate(poll_id, |poll| {
            if !poll.active {
                return Err(PollError::AlreadyStopped(poll.id.clone()));
            }
            poll.active = false;
            Ok(())
        })
        .await?;

        info!(poll_id = %poll_id, "Poll stopped");
        Ok(())
    }

    /// Remove a poll permanently
    pub async fn delete(&self, poll_id: &str) -> Result<(), PollError> {
        let _guard = self.locks.acquire(poll_id).await;

        match self
            .conn
            .call(StoreRequest::Delete {
                key: poll_id.to_string(),
            })
            .await?
        {
            StoreResponse::Deleted(true) => {
                info!(poll_id = %poll_id, "Poll deleted");
                Ok(())
            }
            StoreResponse::Deleted(false) => Err(PollError::NotFound(poll_id.to_string())),
            other => Err(other.unexpected("delete").into()),
        }
    }

    /// Read-modify-write under the poll lock with version-checked writes
    async fn mutate<F>(&self, poll_id: &str, mut apply: F) -> Result<PollRecord, PollError>
    where
        F: FnMut(&mut PollRecord) -> Result<(), PollError>,
    {
        let _guard = self.locks.acquire(poll_id).await;

        for attempt in 1..=self.max_cas_attempts {
            let mut record = self.fetch(poll_id).await?;
            let expected_version = record.version;

            apply(&mut record)?;
            record.version = expected_version + 1;
            let tuple = encode(&record, record.version)?;

            match self
                .conn
                .call(StoreRequest::CompareAndSwap {
                    tuple,
                    expected_version,
                })
                .await?
            {
                StoreResponse::Swapped(CasOutcome::Swapped) => return Ok(record),
                StoreResponse::Swapped(CasOutcome::VersionMismatch) => {
                    debug!(poll_id = %poll_id, attempt, "Version changed underneath, retrying");
                }
                StoreResponse::Swapped(CasOutcome::Missing) => {
                    return Err(PollError::NotFound(poll_id.to_string()));
                }
                other => return Err(other.unexpected("compare_and_swap").into()),
            }
        }

        warn!(poll_id = %poll_id, attempts = self.max_cas_attempts, "Giving up on contended poll");
        Err(PollError::Conflict {
            id: poll_id.to_string(),
            attempts: self.max_cas_attempts,
        })
    }
}

fn encode(record: &PollRecord, version: u64) -> Result<StoredTuple, PollError> {
    let payload = serde_json::to_string(record)
        .map_err(|e| ConnectionError::Protocol(format!("encode poll {}: {}", record.id, e)))?;
    Ok(StoredTuple::new(&record.id, version, payload))
}

fn decode(tuple: &StoredTuple) -> Result<PollRecord, PollError> {
    let mut record: PollRecord = serde_json::from_str(&tuple.payload)
        .map_err(|e| ConnectionError::Protocol(format!("decode poll {}: {}", tuple.key, e)))?;
    record.version = tuple.version;

    if record.options.is_empty() || !record.tally_in_bounds() {
        return Err(ConnectionError::Protocol(format!("poll {} violates record invariants", tuple.key)).into());
    }
    Ok(record)
}
