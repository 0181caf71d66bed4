//! In-Process Store
//!
//! `Connection` implementation backed by a `HashMap`. Used as the fake store
//! in tests and for running the bot without a Redis instance.
//!
//! Fault hooks let tests simulate an unreachable store or a foreign writer
//! racing compare-and-swap requests.

use super::connection::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// In-memory tuple store
#[derive(Debug, Default)]
pub struct MemoryConnection {
    tuples: Mutex<HashMap<String, StoredTuple>>,
    unreachable: AtomicBool,
    /// Pending simulated foreign writes, consumed one per CAS request
    foreign_writes: AtomicU32,
    calls: AtomicU64,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unreachable`
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Bump the stored version before each of the next `count` CAS requests,
    /// as if another process wrote the record in between
    pub fn inject_foreign_writes(&self, count: u32) {
        self.foreign_writes.store(count, Ordering::SeqCst);
    }

    /// Number of calls served so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of stored tuples
    pub fn len(&self) -> usize {
        self.tuples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_foreign_write(&self) -> bool {
        self.foreign_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        "memory"
    }

    async fn call(&self, request: StoreRequest) -> Result<StoreResponse, ConnectionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable(
                "memory store marked unreachable".to_string(),
            ));
        }

        let mut tuples = self.tuples.lock();
        let response = match request {
            StoreRequest::Select { key } => StoreResponse::Tuple(tuples.get(&key).cloned()),
            StoreRequest::Insert { tuple } => {
                if tuples.contains_key(&tuple.key) {
                    StoreResponse::Inserted(false)
                } else {
                    tuples.insert(tuple.key.clone(), tuple);
                    StoreResponse::Inserted(true)
                }
            }
            StoreRequest::CompareAndSwap {
                tuple,
                expected_version,
            } => match tuples.get_mut(&tuple.key) {
                None => StoreResponse::Swapped(CasOutcome::Missing),
                Some(current) => {
                    if self.take_foreign_write() {
                        current.version += 1;
                    }
                    if current.version != expected_version {
                        StoreResponse::Swapped(CasOutcome::VersionMismatch)
                    } else {
                        *current = tuple;
                        StoreResponse::Swapped(CasOutcome::Swapped)
                    }
                }
            },
            StoreRequest::Delete { key } => StoreResponse::Deleted(tuples.remove(&key).is_some()),
        };

        Ok(response)
    }
}
