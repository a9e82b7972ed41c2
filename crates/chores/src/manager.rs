//! Chore manager
//!
//! One manager serves every house. Its operations are spread over the
//! sibling modules (`registry`, `valuation`, `claims`, `proposals`,
//! `breaks`, `ledger`); this module holds the shared state and the storage
//! layout.

use std::sync::Arc;

use mirror_admin::AdminManager;
use mirror_config::HouseConfig;
use mirror_core::storage::{pad_id, Storage};
use mirror_hearts::HeartsManager;
use mirror_polls::PollManager;

use crate::ranking::PowerRanker;

/// Path constants for storage
pub(crate) const CHORES_PATH: &str = "chores/chore";
pub(crate) const CHORE_NAMES_PATH: &str = "chores/chore_name";
pub(crate) const PREFERENCES_PATH: &str = "chores/pref";
pub(crate) const VALUES_PATH: &str = "chores/value";
pub(crate) const VALUE_CURSOR_PATH: &str = "chores/value_cursor";
pub(crate) const CLAIMS_PATH: &str = "chores/claim";
pub(crate) const BREAKS_PATH: &str = "chores/break";
pub(crate) const PROPOSALS_PATH: &str = "chores/proposal";
pub(crate) const GIFTS_PATH: &str = "chores/gift";
pub(crate) const GIFT_GUARD_PATH: &str = "chores/gift_seq";

/// Sequence names
pub(crate) const CHORE_SEQUENCE: &str = "chores";
pub(crate) const VALUE_SEQUENCE: &str = "chore_values";
pub(crate) const CLAIM_SEQUENCE: &str = "chore_claims";
pub(crate) const BREAK_SEQUENCE: &str = "chore_breaks";
pub(crate) const PROPOSAL_SEQUENCE: &str = "chore_proposals";
pub(crate) const GIFT_SEQUENCE: &str = "chore_gifts";

/// Attempts at an optimistic read-modify-write before giving up
pub(crate) const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Chore registry, valuation, claims, proposals and points ledger
pub struct ChoresManager {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) config: HouseConfig,
    pub(crate) polls: Arc<PollManager>,
    pub(crate) admin: Arc<AdminManager>,
    pub(crate) hearts: Arc<HeartsManager>,
    pub(crate) ranker: PowerRanker,
}

impl ChoresManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        config: HouseConfig,
        polls: Arc<PollManager>,
        admin: Arc<AdminManager>,
        hearts: Arc<HeartsManager>,
    ) -> Self {
        let ranker = PowerRanker::from_config(&config);
        Self {
            storage,
            config,
            polls,
            admin,
            hearts,
            ranker,
        }
    }

    pub fn config(&self) -> &HouseConfig {
        &self.config
    }

    pub(crate) fn chore_key(house_id: &str, chore_id: u64) -> String {
        format!("{}/{}/{}", CHORES_PATH, house_id, pad_id(chore_id))
    }

    pub(crate) fn chore_name_key(house_id: &str, name: &str) -> String {
        format!("{}/{}/{}", CHORE_NAMES_PATH, house_id, name)
    }

    pub(crate) fn preference_key(house_id: &str, resident_id: &str, alpha: u64, beta: u64) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            PREFERENCES_PATH,
            house_id,
            resident_id,
            pad_id(alpha),
            pad_id(beta)
        )
    }

    pub(crate) fn values_prefix(house_id: &str, chore_id: u64) -> String {
        format!("{}/{}/{}/", VALUES_PATH, house_id, pad_id(chore_id))
    }

    pub(crate) fn value_cursor_key(house_id: &str) -> String {
        format!("{}/{}", VALUE_CURSOR_PATH, house_id)
    }

    pub(crate) fn claim_key(house_id: &str, claim_id: u64) -> String {
        format!("{}/{}/{}", CLAIMS_PATH, house_id, pad_id(claim_id))
    }

    pub(crate) fn break_key(house_id: &str, break_id: u64) -> String {
        format!("{}/{}/{}", BREAKS_PATH, house_id, pad_id(break_id))
    }

    pub(crate) fn proposal_key(house_id: &str, proposal_id: u64) -> String {
        format!("{}/{}/{}", PROPOSALS_PATH, house_id, pad_id(proposal_id))
    }

    pub(crate) fn gift_key(house_id: &str, gift_id: u64) -> String {
        format!("{}/{}/{}", GIFTS_PATH, house_id, pad_id(gift_id))
    }

    pub(crate) fn gift_guard_key(house_id: &str, resident_id: &str) -> String {
        format!("{}/{}/{}", GIFT_GUARD_PATH, house_id, resident_id)
    }

    pub(crate) fn house_prefix(path: &str, house_id: &str) -> String {
        format!("{}/{}/", path, house_id)
    }
}
