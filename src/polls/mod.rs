//! Polls
//!
//! Poll records and the store that owns them.

pub mod model;
pub mod store;

pub use model::{generate_poll_id, OptionResult, PollRecord, PollResults};
pub use store::{PollError, PollGuard, PollLocks, PollStore, DEFAULT_CAS_ATTEMPTS};
