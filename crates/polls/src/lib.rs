//! Polling primitive for Mirror
//!
//! Polls are time-boxed yes/no votes attached to chore claims and proposals.
//! A resident's ballot is keyed by a salted hash of their id, so each
//! resident holds exactly one ballot per poll (later submissions replace
//! earlier ones) while stored votes never name the voter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mirror_core::StorageError;

pub mod manager;
pub mod tally;

pub use manager::PollManager;
pub use tally::PollTally;

/// Error types for poll operations
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Poll not found: {0}")]
    PollNotFound(u64),

    #[error("Poll {0} has closed")]
    PollClosed(u64),

    #[error("Invalid poll: {0}")]
    InvalidPoll(String),
}

/// Result type for poll operations
pub type PollResult<T> = Result<T, PollError>;

/// A time-boxed anonymous poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    /// Poll identifier
    pub id: u64,
    /// House the poll belongs to
    pub house_id: String,
    /// Votes submitted before this instant are not counted
    pub start_time: DateTime<Utc>,
    /// Votes submitted after this instant are rejected
    pub end_time: DateTime<Utc>,
    /// Yes votes needed for the poll to pass
    pub min_votes: u32,
}

impl Poll {
    /// A poll is closed from its end time onwards
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Whether a vote submitted at `at` falls inside the counting window
    pub fn counts_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_time && at <= self.end_time
    }
}

/// A single anonymized ballot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollVote {
    /// Poll the vote belongs to
    pub poll_id: u64,
    /// Hex digest of the salted voter id
    pub voter_hash: String,
    /// When the ballot was (last) submitted
    pub submitted_at: DateTime<Utc>,
    /// `Some(true)` for yes, `Some(false)` for no, `None` to abstain
    pub vote: Option<bool>,
}
