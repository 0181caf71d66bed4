//! Poll Records
//!
//! The persisted poll shape plus the derived results view.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A poll as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    /// Unique poll ID
    pub id: String,

    /// Author user ID
    pub creator_id: String,

    /// Question text
    pub title: String,

    /// Ordered options, fixed at creation
    pub options: Vec<String>,

    /// Option index -> vote count; absent indices count as zero
    #[serde(default)]
    pub tally: BTreeMap<usize, u64>,

    /// Whether the poll still accepts votes
    pub active: bool,

    /// Store write counter (carried outside the encoded body)
    #[serde(skip)]
    pub version: u64,
}

impl PollRecord {
    pub fn new(id: &str, creator_id: &str, title: &str, options: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            creator_id: creator_id.to_string(),
            title: title.to_string(),
            options,
            tally: BTreeMap::new(),
            active: true,
            version: 1,
        }
    }

    /// Votes recorded for an option
    pub fn votes_for(&self, index: usize) -> u64 {
        self.tally.get(&index).copied().unwrap_or(0)
    }

    /// Sum of all votes
    pub fn total_votes(&self) -> u64 {
        self.tally.values().sum()
    }

    /// Check that every tally key lies within the options
    pub fn tally_in_bounds(&self) -> bool {
        self.tally.keys().all(|&index| index < self.options.len())
    }

    /// Compute per-option counts and percentages
    pub fn results(&self) -> PollResults {
        let total = self.total_votes();

        let options = self
            .options
            .iter()
            .enumerate()
            .map(|(index, label)| {
                let votes = self.votes_for(index);
                OptionResult {
                    number: index + 1,
                    label: label.clone(),
                    votes,
                    percent: if total > 0 {
                        (votes as f64 / total as f64) * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        PollResults {
            poll_id: self.id.clone(),
            title: self.title.clone(),
            active: self.active,
            total_votes: total,
            options,
        }
    }
}

/// Results for one option
#[derive(Debug, Clone, PartialEq)]
pub struct OptionResult {
    /// 1-based option number as users type it
    pub number: usize,
    pub label: String,
    pub votes: u64,
    /// Share of all votes, 0.0 when nobody voted
    pub percent: f64,
}

/// Results view returned by `show`
#[derive(Debug, Clone, PartialEq)]
pub struct PollResults {
    pub poll_id: String,
    pub title: String,
    pub active: bool,
    pub total_votes: u64,
    pub options: Vec<OptionResult>,
}

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Generate a poll ID from the current time in nanoseconds.
///
/// IDs are strictly increasing within the process even when the clock
/// repeats or steps backwards.
pub fn generate_poll_id() -> String {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;

    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_ID.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}
