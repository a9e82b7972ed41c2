//! House and resident records
//!
//! Residents are created on first interaction and never removed: leaving a
//! house only clears the `active` flag, so claims and gifts that reference
//! the resident stay meaningful.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mirror_core::StorageError;

pub mod manager;

pub use manager::AdminManager;

/// Error types for admin operations
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("House not found: {0}")]
    HouseNotFound(String),

    #[error("Resident not found: {0}")]
    ResidentNotFound(String),

    #[error("Concurrent update of {0} did not settle")]
    Contention(String),
}

/// Result type for admin operations
pub type AdminResult<T> = Result<T, AdminError>;

/// A shared living unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct House {
    /// Platform identifier of the house
    pub id: String,
}

/// A member of a house
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resident {
    /// Platform identifier of the resident
    pub id: String,
    /// House the resident belongs to
    pub house_id: String,
    /// Whether the resident currently lives in the house
    pub active: bool,
    /// When the resident last became active
    pub active_at: Option<DateTime<Utc>>,
    /// When the resident became exempt from chores, if they are
    pub exempt_at: Option<DateTime<Utc>>,
}

impl Resident {
    /// Exempt residents neither vote nor owe points
    pub fn is_exempt(&self, now: DateTime<Utc>) -> bool {
        self.exempt_at.map_or(false, |t| t <= now)
    }

    /// Active and not exempt at `now`
    pub fn can_vote(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_exempt(now)
    }
}
