//! Tuple Store Access
//!
//! One request/response `Connection` per process, injected into `PollStore`:
//! - Redis (production)
//! - Memory (tests, local runs)

pub mod connection;
pub mod memory;
pub mod redis_store;

pub use connection::{
    CasOutcome, Connection, ConnectionError, DynConnection, StoreRequest, StoreResponse,
    StoredTuple,
};
pub use memory::MemoryConnection;
pub use redis_store::{RedisConfig, RedisConnection};
