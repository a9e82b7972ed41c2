//! Heart balances
//!
//! Hearts are the accountability score of a resident. This crate keeps only
//! what the chore penalty engine needs: initialising a resident's balance,
//! summing it, and recording chore penalties at most once per month.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mirror_core::StorageError;

pub mod manager;

pub use manager::HeartsManager;

/// Error types for hearts operations
#[derive(Error, Debug)]
pub enum HeartsError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Invalid heart value: {0}")]
    InvalidValue(f64),
}

/// Result type for hearts operations
pub type HeartsResult<T> = Result<T, HeartsError>;

/// Why a heart row was generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartKind {
    /// Starting balance granted on initialisation
    Initial,
    /// Deduction for missing the monthly chore target
    ChorePenalty,
}

/// A change to a resident's heart balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heart {
    pub id: u64,
    pub house_id: String,
    pub resident_id: String,
    pub kind: HeartKind,
    pub generated_at: DateTime<Utc>,
    /// Signed change; penalties are negative
    pub value: f64,
}
