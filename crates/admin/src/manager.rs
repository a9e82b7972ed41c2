use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use mirror_core::storage::{JsonStorage, Storage, WriteBatch};

use crate::{AdminError, AdminResult, House, Resident};

const HOUSES_PATH: &str = "admin/houses";
const RESIDENTS_PATH: &str = "admin/residents";
const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Manages houses and their residents
pub struct AdminManager {
    storage: Arc<dyn Storage>,
}

impl AdminManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn house_key(house_id: &str) -> String {
        format!("{}/{}", HOUSES_PATH, house_id)
    }

    fn resident_key(house_id: &str, resident_id: &str) -> String {
        format!("{}/{}/{}", RESIDENTS_PATH, house_id, resident_id)
    }

    /// Register a house. Adding an existing house changes nothing.
    pub async fn add_house(&self, house_id: &str) -> AdminResult<House> {
        let house = House { id: house_id.to_string() };
        let batch = WriteBatch::new()
            .expect_absent(Self::house_key(house_id))
            .put_json(Self::house_key(house_id), &house)?;
        if self.storage.commit(batch).await? {
            info!("Added house {}", house_id);
        }
        Ok(house)
    }

    pub async fn get_house(&self, house_id: &str) -> AdminResult<House> {
        self.storage
            .get_json_opt(&Self::house_key(house_id))
            .await?
            .ok_or_else(|| AdminError::HouseNotFound(house_id.to_string()))
    }

    /// Read-modify-write a resident record, retrying when another writer got there first.
    /// `update` returns `None` when no write is needed.
    async fn upsert_resident<F>(&self, house_id: &str, resident_id: &str, update: F) -> AdminResult<Resident>
    where
        F: Fn(Option<Resident>) -> Option<Resident>,
    {
        let key = Self::resident_key(house_id, resident_id);
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.storage.get_json_versioned::<Resident>(&key).await?;
            let (existing, raw) = match current {
                Some((resident, raw)) => (Some(resident), Some(raw)),
                None => (None, None),
            };

            let updated = match update(existing.clone()) {
                Some(updated) => updated,
                None => {
                    return existing.ok_or_else(|| AdminError::ResidentNotFound(resident_id.to_string()))
                }
            };

            let batch = WriteBatch::new()
                .expect_current(key.as_str(), raw)
                .put_json(key.as_str(), &updated)?;
            if self.storage.commit(batch).await? {
                return Ok(updated);
            }
            debug!("Retrying update of resident {}", resident_id);
        }
        Err(AdminError::Contention(resident_id.to_string()))
    }

    /// Create a resident, or reactivate one who left. Already active residents are untouched.
    pub async fn add_resident(&self, house_id: &str, resident_id: &str, now: DateTime<Utc>) -> AdminResult<Resident> {
        self.get_house(house_id).await?;

        let resident = self
            .upsert_resident(house_id, resident_id, |existing| match existing {
                Some(resident) if resident.active => None,
                Some(resident) => Some(Resident { active: true, active_at: Some(now), ..resident }),
                None => Some(Resident {
                    id: resident_id.to_string(),
                    house_id: house_id.to_string(),
                    active: true,
                    active_at: Some(now),
                    exempt_at: None,
                }),
            })
            .await?;

        debug!("Resident {} active in house {}", resident_id, house_id);
        Ok(resident)
    }

    /// Mark a resident as having left the house
    pub async fn deactivate_resident(&self, house_id: &str, resident_id: &str) -> AdminResult<Resident> {
        let resident = self
            .upsert_resident(house_id, resident_id, |existing| {
                existing
                    .filter(|r| r.active)
                    .map(|r| Resident { active: false, ..r })
            })
            .await?;
        info!("Deactivated resident {} in house {}", resident_id, house_id);
        Ok(resident)
    }

    /// Exempt a resident from chores from `now` on
    pub async fn exempt_resident(&self, house_id: &str, resident_id: &str, now: DateTime<Utc>) -> AdminResult<Resident> {
        self.upsert_resident(house_id, resident_id, |existing| {
            existing
                .filter(|r| r.exempt_at.is_none())
                .map(|r| Resident { exempt_at: Some(now), ..r })
        })
        .await
    }

    /// Lift a resident's exemption
    pub async fn unexempt_resident(&self, house_id: &str, resident_id: &str) -> AdminResult<Resident> {
        self.upsert_resident(house_id, resident_id, |existing| {
            existing
                .filter(|r| r.exempt_at.is_some())
                .map(|r| Resident { exempt_at: None, ..r })
        })
        .await
    }

    pub async fn get_resident(&self, house_id: &str, resident_id: &str) -> AdminResult<Resident> {
        self.storage
            .get_json_opt(&Self::resident_key(house_id, resident_id))
            .await?
            .ok_or_else(|| AdminError::ResidentNotFound(resident_id.to_string()))
    }

    /// Every resident ever registered in the house, active or not
    pub async fn get_all_residents(&self, house_id: &str) -> AdminResult<Vec<Resident>> {
        let prefix = format!("{}/{}/", RESIDENTS_PATH, house_id);
        Ok(self.storage.scan_json(&prefix).await?)
    }

    /// Active residents of the house
    pub async fn get_residents(&self, house_id: &str) -> AdminResult<Vec<Resident>> {
        let residents = self.get_all_residents(house_id).await?;
        Ok(residents.into_iter().filter(|r| r.active).collect())
    }

    /// Active residents who are not exempt at `now`
    pub async fn get_voting_residents(&self, house_id: &str, now: DateTime<Utc>) -> AdminResult<Vec<Resident>> {
        let residents = self.get_all_residents(house_id).await?;
        Ok(residents.into_iter().filter(|r| r.can_vote(now)).collect())
    }
}
