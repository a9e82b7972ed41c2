//! Mirror
//!
//! Consensus-gated chore valuation and point accounting for shared houses.
//! [`Mirror`] wires the storage, polling, resident, hearts and chore
//! managers together over one store and runs the periodic bookkeeping that
//! is triggered by resident activity.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use mirror_admin as admin;
pub use mirror_chores as chores;
pub use mirror_config as config;
pub use mirror_core as core;
pub use mirror_hearts as hearts;
pub use mirror_polls as polls;

use mirror_admin::{AdminError, AdminManager};
use mirror_chores::{ChoreClaim, ChoreProposal, ChoreValue, ChoresError, ChoresManager};
use mirror_config::HouseConfig;
use mirror_core::storage::{MemoryStorage, SledStorage, Storage, StorageError};
use mirror_hearts::{Heart, HeartsError, HeartsManager};
use mirror_polls::PollManager;

/// Module version information
pub mod version {
    /// The current version of the Mirror library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Error types for facade operations
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Admin error: {0}")]
    AdminError(#[from] AdminError),

    #[error("Hearts error: {0}")]
    HeartsError(#[from] HeartsError),

    #[error("Chores error: {0}")]
    ChoresError(#[from] ChoresError),
}

/// Result type for facade operations
pub type MirrorResult<T> = Result<T, MirrorError>;

/// What a round of activity bookkeeping changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub resolved_claims: Vec<ChoreClaim>,
    pub resolved_proposals: Vec<ChoreProposal>,
    /// Value increments written by the valuation update
    pub new_values: Vec<ChoreValue>,
    /// Penalty assessed on the active resident, if one was due
    pub penalty: Option<Heart>,
}

/// All managers of a Mirror deployment over one store
pub struct Mirror {
    config: HouseConfig,
    storage: Arc<dyn Storage>,
    polls: Arc<PollManager>,
    admin: Arc<AdminManager>,
    hearts: Arc<HeartsManager>,
    chores: Arc<ChoresManager>,
}

impl Mirror {
    pub fn new(storage: Arc<dyn Storage>, config: HouseConfig) -> Self {
        let polls = Arc::new(PollManager::new(storage.clone(), config.vote_salt.clone()));
        let admin = Arc::new(AdminManager::new(storage.clone()));
        let hearts = Arc::new(HeartsManager::new(storage.clone(), config.initial_hearts));
        let chores = Arc::new(ChoresManager::new(
            storage.clone(),
            config.clone(),
            polls.clone(),
            admin.clone(),
            hearts.clone(),
        ));

        Self {
            config,
            storage,
            polls,
            admin,
            hearts,
            chores,
        }
    }

    /// A deployment backed by memory only
    pub fn in_memory(config: HouseConfig) -> Self {
        Self::new(Arc::new(MemoryStorage::new()), config)
    }

    /// A deployment persisted in the sled database at `path`
    pub fn open<P: AsRef<Path>>(path: P, config: HouseConfig) -> MirrorResult<Self> {
        let storage = SledStorage::open(path)?;
        Ok(Self::new(Arc::new(storage), config))
    }

    pub fn config(&self) -> &HouseConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn polls(&self) -> &PollManager {
        &self.polls
    }

    pub fn admin(&self) -> &AdminManager {
        &self.admin
    }

    pub fn hearts(&self) -> &HeartsManager {
        &self.hearts
    }

    pub fn chores(&self) -> &ChoresManager {
        &self.chores
    }

    /// Bookkeeping run whenever a resident shows up.
    ///
    /// Registers the house and resident, settles claims and proposals whose
    /// polls have closed, credits pending chore value and assesses the
    /// resident's penalty for last month. Every step is idempotent, so
    /// concurrent or repeated calls converge.
    pub async fn on_resident_activity(
        &self,
        house_id: &str,
        resident_id: &str,
        now: DateTime<Utc>,
    ) -> MirrorResult<ActivityReport> {
        self.admin.add_house(house_id).await?;
        self.admin.add_resident(house_id, resident_id, now).await?;
        if self.hearts.initialise_resident(house_id, resident_id, now).await?.is_some() {
            debug!("First activity of resident {} in house {}", resident_id, house_id);
        }

        let report = ActivityReport {
            resolved_claims: self.chores.resolve_chore_claims(house_id, now).await?,
            resolved_proposals: self.chores.resolve_chore_proposals(house_id, now).await?,
            new_values: self.chores.update_chore_values(house_id, now).await?,
            penalty: self.chores.add_chore_penalty(house_id, resident_id, now).await?,
        };

        info!(
            "Activity of {} in house {}: {} claims and {} proposals resolved, {} values written",
            resident_id,
            house_id,
            report.resolved_claims.len(),
            report.resolved_proposals.len(),
            report.new_values.len()
        );
        Ok(report)
    }
}
