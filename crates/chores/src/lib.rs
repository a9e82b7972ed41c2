//! Chores for Mirror
//!
//! Residents express pairwise preferences between chores, which are ranked
//! into shares of a monthly point budget. Chores accrue value every hour
//! until someone claims them; a claim is confirmed by a house vote. Changes
//! to the chore list go through proposals, and residents who fall short of
//! their monthly points lose hearts.

pub mod breaks;
pub mod claims;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod proposals;
pub mod ranking;
pub mod registry;
pub mod types;
pub mod valuation;

pub use error::{ChoresError, ChoresResult, ErrorKind};
pub use ledger::penalty_for_deficit;
pub use manager::ChoresManager;
pub use proposals::proposal_min_votes;
pub use ranking::PowerRanker;
pub use registry::normalize_preference;
pub use types::*;
