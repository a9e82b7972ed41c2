//! Chore records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recurring task of a house
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chore {
    pub id: u64,
    pub house_id: String,
    /// Unique within the house
    pub name: String,
    pub active: bool,
    /// Free-form details such as a description
    pub metadata: serde_json::Value,
}

/// One resident's opinion on a pair of chores.
///
/// Always stored with `alpha_chore_id < beta_chore_id`. A preference of 1
/// sends all value to alpha, 0 sends all value to beta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChorePreference {
    pub house_id: String,
    pub resident_id: String,
    pub alpha_chore_id: u64,
    pub beta_chore_id: u64,
    pub preference: f64,
}

/// Inputs recorded alongside an automatic value increment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreValueMetadata {
    /// Share of the budget the chore received
    pub ranking: f64,
    /// Residents counted towards the budget
    pub residents: usize,
    /// Interval scalar of the update
    pub scalar: f64,
}

/// An immutable value increment of a chore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreValue {
    pub id: u64,
    pub house_id: String,
    pub chore_id: u64,
    pub valued_at: DateTime<Utc>,
    pub value: f64,
    /// Absent for increments recorded by hand
    pub metadata: Option<ChoreValueMetadata>,
}

/// Priority share of a chore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreRanking {
    pub chore_id: u64,
    pub name: String,
    pub ranking: f64,
}

/// Value a chore has accrued since it was last claimed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentChoreValue {
    pub chore_id: u64,
    pub name: String,
    pub value: f64,
}

/// A resident's assertion that they did a chore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreClaim {
    pub id: u64,
    pub house_id: String,
    pub chore_id: u64,
    pub claimed_by: String,
    pub claimed_at: DateTime<Utc>,
    /// Provisional until resolution, fixed afterwards
    pub value: f64,
    pub poll_id: u64,
    pub resolved_at: Option<DateTime<Utc>>,
    /// True while pending; false once rejected
    pub valid: bool,
}

impl ChoreClaim {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A period a resident is excused from chores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreBreak {
    pub id: u64,
    pub house_id: String,
    pub resident_id: String,
    pub start_date: DateTime<Utc>,
    /// Exclusive
    pub end_date: DateTime<Utc>,
    pub circumstance: String,
}

impl ChoreBreak {
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now < self.end_date
    }
}

/// What a proposal would do to the chore list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalKind {
    Add,
    Edit,
    Delete,
}

/// A vote-gated change to the chore list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreProposal {
    pub id: u64,
    pub house_id: String,
    pub proposed_by: String,
    pub proposed_at: DateTime<Utc>,
    /// `None` for additions
    pub chore_id: Option<u64>,
    pub name: String,
    pub metadata: serde_json::Value,
    /// `false` for deletions
    pub active: bool,
    pub poll_id: u64,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether the change was applied
    pub valid: bool,
}

impl ChoreProposal {
    pub fn kind(&self) -> ProposalKind {
        match (self.chore_id, self.active) {
            (None, _) => ProposalKind::Add,
            (Some(_), true) => ProposalKind::Edit,
            (Some(_), false) => ProposalKind::Delete,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// One side of a point transfer between residents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGift {
    pub id: u64,
    pub house_id: String,
    /// Resident whose balance this row changes
    pub resident_id: String,
    /// The other side of the transfer
    pub counterparty_id: String,
    pub gifted_at: DateTime<Utc>,
    /// Negative for the giver, positive for the recipient
    pub value: f64,
}

/// Breakdown of a resident's points over a window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointsSummary {
    /// Value of claims that are valid or pending
    pub claimed: f64,
    pub received: f64,
    pub given: f64,
    /// claimed + received - given, without penalties
    pub balance: f64,
    /// Hearts deducted by chore penalties assessed in the window
    pub penalty_hearts: f64,
}
