//! Chore list and preferences
//!
//! Chore names are unique per house through a name index. Chores are never
//! removed: deleting clears `active`, and adding a chore under a known name
//! reactivates it with the new metadata.

use std::collections::HashSet;
use tracing::{debug, info};

use mirror_core::storage::{JsonStorage, WriteBatch};

use crate::error::{ChoresError, ChoresResult};
use crate::manager::{ChoresManager, CHORES_PATH, CHORE_SEQUENCE, MAX_UPDATE_ATTEMPTS, PREFERENCES_PATH};
use crate::types::{Chore, ChorePreference};

/// Turn "prefer `target` over `source` with `strength`" into a canonical
/// `(alpha, beta, preference)` triple with `alpha < beta`.
///
/// `strength` is 1 for a full preference of target, 0.5 for indifference.
pub fn normalize_preference(target: u64, source: u64, strength: f64) -> ChoresResult<(u64, u64, f64)> {
    if target == source {
        return Err(ChoresError::validation("Cannot compare a chore with itself"));
    }
    if !(0.0..=1.0).contains(&strength) {
        return Err(ChoresError::validation("Preference must be between 0 and 1"));
    }
    if target < source {
        Ok((target, source, strength))
    } else {
        Ok((source, target, 1.0 - strength))
    }
}

pub(crate) fn validate_name(name: &str) -> ChoresResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChoresError::validation("Chore name cannot be empty"));
    }
    Ok(name.to_string())
}

impl ChoresManager {
    async fn get_chore_versioned(&self, house_id: &str, chore_id: u64) -> ChoresResult<(Chore, Vec<u8>)> {
        self.storage
            .get_json_versioned(&Self::chore_key(house_id, chore_id))
            .await?
            .ok_or_else(|| ChoresError::NotFound(format!("Chore {}", chore_id)))
    }

    pub async fn get_chore(&self, house_id: &str, chore_id: u64) -> ChoresResult<Chore> {
        Ok(self.get_chore_versioned(house_id, chore_id).await?.0)
    }

    /// Every chore of the house, including deleted ones, in id order
    pub async fn get_all_chores(&self, house_id: &str) -> ChoresResult<Vec<Chore>> {
        Ok(self
            .storage
            .scan_json(&Self::house_prefix(CHORES_PATH, house_id))
            .await?)
    }

    /// Active chores of the house, in id order
    pub async fn get_chores(&self, house_id: &str) -> ChoresResult<Vec<Chore>> {
        let chores = self.get_all_chores(house_id).await?;
        Ok(chores.into_iter().filter(|c| c.active).collect())
    }

    /// Stage an add-or-reactivate of the chore called `name`
    pub(crate) async fn upsert_chore_batch(
        &self,
        batch: WriteBatch,
        house_id: &str,
        name: &str,
        metadata: serde_json::Value,
    ) -> ChoresResult<(WriteBatch, Chore)> {
        let name_key = Self::chore_name_key(house_id, name);

        let existing = self.storage.get_json_versioned::<u64>(&name_key).await?;
        match existing {
            Some((chore_id, name_raw)) => {
                let (chore, chore_raw) = self.get_chore_versioned(house_id, chore_id).await?;
                let chore_key = Self::chore_key(house_id, chore_id);
                let updated = Chore {
                    active: true,
                    metadata,
                    ..chore
                };
                let batch = batch
                    .expect_value(name_key, name_raw)
                    .expect_value(chore_key.as_str(), chore_raw)
                    .put_json(chore_key, &updated)?;
                Ok((batch, updated))
            }
            None => {
                let chore_id = self.storage.next_id(CHORE_SEQUENCE).await?;
                let chore = Chore {
                    id: chore_id,
                    house_id: house_id.to_string(),
                    name: name.to_string(),
                    active: true,
                    metadata,
                };
                let batch = batch
                    .expect_absent(name_key.as_str())
                    .put_json(name_key, &chore_id)?
                    .put_json(Self::chore_key(house_id, chore_id), &chore)?;
                Ok((batch, chore))
            }
        }
    }

    /// Stage a rename and metadata update. Returns `None` when another chore
    /// already uses the new name.
    pub(crate) async fn edit_chore_batch(
        &self,
        batch: WriteBatch,
        house_id: &str,
        chore_id: u64,
        name: &str,
        metadata: serde_json::Value,
    ) -> ChoresResult<Option<(WriteBatch, Chore)>> {
        let (chore, chore_raw) = self.get_chore_versioned(house_id, chore_id).await?;
        let chore_key = Self::chore_key(house_id, chore_id);
        let mut batch = batch.expect_value(chore_key.as_str(), chore_raw);

        if chore.name != name {
            let new_key = Self::chore_name_key(house_id, name);
            let existing = self.storage.get_json_versioned::<u64>(&new_key).await?;
            batch = match existing {
                Some((other, _)) if other != chore_id => return Ok(None),
                Some((_, raw)) => batch.expect_value(new_key, raw),
                None => batch.expect_absent(new_key.as_str()).put_json(new_key, &chore_id)?,
            };
            batch = batch.delete(Self::chore_name_key(house_id, &chore.name));
        }

        let updated = Chore {
            name: name.to_string(),
            active: true,
            metadata,
            ..chore
        };
        let batch = batch.put_json(chore_key, &updated)?;
        Ok(Some((batch, updated)))
    }

    /// Stage a soft delete
    pub(crate) async fn delete_chore_batch(
        &self,
        batch: WriteBatch,
        house_id: &str,
        chore_id: u64,
    ) -> ChoresResult<(WriteBatch, Chore)> {
        let (chore, chore_raw) = self.get_chore_versioned(house_id, chore_id).await?;
        let chore_key = Self::chore_key(house_id, chore_id);
        let updated = Chore { active: false, ..chore };
        let batch = batch
            .expect_value(chore_key.as_str(), chore_raw)
            .put_json(chore_key, &updated)?;
        Ok((batch, updated))
    }

    /// Add a chore, or reactivate and overwrite the chore with the same name
    pub async fn add_chore(&self, house_id: &str, name: &str, metadata: serde_json::Value) -> ChoresResult<Chore> {
        let name = validate_name(name)?;
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (batch, chore) = self
                .upsert_chore_batch(WriteBatch::new(), house_id, &name, metadata.clone())
                .await?;
            if self.storage.commit(batch).await? {
                info!("Added chore {} ({}) to house {}", chore.name, chore.id, house_id);
                return Ok(chore);
            }
            debug!("Retrying add of chore {}", name);
        }
        Err(ChoresError::Contention(format!("chore {}", name)))
    }

    /// Rename a chore and replace its metadata
    pub async fn edit_chore(
        &self,
        house_id: &str,
        chore_id: u64,
        name: &str,
        metadata: serde_json::Value,
    ) -> ChoresResult<Chore> {
        let name = validate_name(name)?;
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (batch, chore) = self
                .edit_chore_batch(WriteBatch::new(), house_id, chore_id, &name, metadata.clone())
                .await?
                .ok_or_else(|| ChoresError::validation(format!("A chore named {} already exists", name)))?;
            if self.storage.commit(batch).await? {
                info!("Edited chore {} in house {}", chore_id, house_id);
                return Ok(chore);
            }
            debug!("Retrying edit of chore {}", chore_id);
        }
        Err(ChoresError::Contention(format!("chore {}", chore_id)))
    }

    /// Deactivate a chore
    pub async fn delete_chore(&self, house_id: &str, chore_id: u64) -> ChoresResult<Chore> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (batch, chore) = self.delete_chore_batch(WriteBatch::new(), house_id, chore_id).await?;
            if self.storage.commit(batch).await? {
                info!("Deleted chore {} in house {}", chore_id, house_id);
                return Ok(chore);
            }
            debug!("Retrying delete of chore {}", chore_id);
        }
        Err(ChoresError::Contention(format!("chore {}", chore_id)))
    }

    /// Record a resident's preference between two chores, replacing any earlier one.
    ///
    /// Only active residents of the house may state preferences.
    pub async fn set_chore_preference(
        &self,
        house_id: &str,
        resident_id: &str,
        alpha_chore_id: u64,
        beta_chore_id: u64,
        preference: f64,
    ) -> ChoresResult<ChorePreference> {
        if alpha_chore_id >= beta_chore_id {
            return Err(ChoresError::validation("Chores out of order"));
        }
        if !(0.0..=1.0).contains(&preference) {
            return Err(ChoresError::validation("Preference must be between 0 and 1"));
        }
        let resident = self.admin.get_resident(house_id, resident_id).await?;
        if !resident.active {
            return Err(ChoresError::validation(format!("Resident {} is no longer active", resident_id)));
        }
        self.get_chore(house_id, alpha_chore_id).await?;
        self.get_chore(house_id, beta_chore_id).await?;

        let pref = ChorePreference {
            house_id: house_id.to_string(),
            resident_id: resident_id.to_string(),
            alpha_chore_id,
            beta_chore_id,
            preference,
        };
        let key = Self::preference_key(house_id, resident_id, alpha_chore_id, beta_chore_id);
        self.storage.put_json(&key, &pref).await?;

        debug!(
            "Resident {} set preference {} between chores {} and {}",
            resident_id, preference, alpha_chore_id, beta_chore_id
        );
        Ok(pref)
    }

    /// Every preference recorded in the house
    pub async fn get_chore_preferences(&self, house_id: &str) -> ChoresResult<Vec<ChorePreference>> {
        Ok(self
            .storage
            .scan_json(&Self::house_prefix(PREFERENCES_PATH, house_id))
            .await?)
    }

    /// Preferences of active residents between active chores
    pub async fn get_active_chore_preferences(&self, house_id: &str) -> ChoresResult<Vec<ChorePreference>> {
        let residents: HashSet<String> = self
            .admin
            .get_residents(house_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let chores: HashSet<u64> = self
            .get_chores(house_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let prefs = self.get_chore_preferences(house_id).await?;
        Ok(prefs
            .into_iter()
            .filter(|p| residents.contains(&p.resident_id))
            .filter(|p| chores.contains(&p.alpha_chore_id) && chores.contains(&p.beta_chore_id))
            .collect())
    }
}
