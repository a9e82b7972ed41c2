use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use mirror_core::storage::{pad_id, JsonStorage, Storage, WriteBatch};
use mirror_core::utils::month_key;

use crate::{Heart, HeartKind, HeartsError, HeartsResult};

const HEARTS_PATH: &str = "hearts/rows";
const INIT_PATH: &str = "hearts/init";
const PENALTY_PATH: &str = "hearts/penalty";
const HEART_SEQUENCE: &str = "hearts";

/// Records heart changes per resident
pub struct HeartsManager {
    storage: Arc<dyn Storage>,
    /// Balance granted on initialisation
    initial_hearts: f64,
}

impl HeartsManager {
    pub fn new(storage: Arc<dyn Storage>, initial_hearts: f64) -> Self {
        Self { storage, initial_hearts }
    }

    fn rows_prefix(house_id: &str, resident_id: &str) -> String {
        format!("{}/{}/{}/", HEARTS_PATH, house_id, resident_id)
    }

    fn init_key(house_id: &str, resident_id: &str) -> String {
        format!("{}/{}/{}", INIT_PATH, house_id, resident_id)
    }

    fn penalty_key(house_id: &str, resident_id: &str, month: DateTime<Utc>) -> String {
        format!("{}/{}/{}/{}", PENALTY_PATH, house_id, resident_id, month_key(month))
    }

    async fn new_heart(
        &self,
        house_id: &str,
        resident_id: &str,
        kind: HeartKind,
        generated_at: DateTime<Utc>,
        value: f64,
    ) -> HeartsResult<(String, Heart)> {
        let id = self.storage.next_id(HEART_SEQUENCE).await?;
        let key = format!("{}{}", Self::rows_prefix(house_id, resident_id), pad_id(id));
        let heart = Heart {
            id,
            house_id: house_id.to_string(),
            resident_id: resident_id.to_string(),
            kind,
            generated_at,
            value,
        };
        Ok((key, heart))
    }

    /// Grant the starting balance. Returns `None` if the resident was already initialised.
    pub async fn initialise_resident(
        &self,
        house_id: &str,
        resident_id: &str,
        now: DateTime<Utc>,
    ) -> HeartsResult<Option<Heart>> {
        if self.is_initialised(house_id, resident_id).await? {
            return Ok(None);
        }

        let (key, heart) = self
            .new_heart(house_id, resident_id, HeartKind::Initial, now, self.initial_hearts)
            .await?;
        let init_key = Self::init_key(house_id, resident_id);
        let batch = WriteBatch::new()
            .expect_absent(init_key.as_str())
            .put_json(init_key.as_str(), &now)?
            .put_json(key, &heart)?;

        if !self.storage.commit(batch).await? {
            return Ok(None);
        }
        info!("Initialised hearts for resident {} in house {}", resident_id, house_id);
        Ok(Some(heart))
    }

    pub async fn is_initialised(&self, house_id: &str, resident_id: &str) -> HeartsResult<bool> {
        Ok(self.storage.exists(&Self::init_key(house_id, resident_id)).await?)
    }

    /// Every heart row of a resident, oldest first
    pub async fn get_resident_hearts(&self, house_id: &str, resident_id: &str) -> HeartsResult<Vec<Heart>> {
        Ok(self.storage.scan_json(&Self::rows_prefix(house_id, resident_id)).await?)
    }

    /// Heart balance as of `now`
    pub async fn get_hearts(&self, house_id: &str, resident_id: &str, now: DateTime<Utc>) -> HeartsResult<f64> {
        let hearts = self.get_resident_hearts(house_id, resident_id).await?;
        Ok(hearts
            .iter()
            .filter(|h| h.generated_at <= now)
            .map(|h| h.value)
            .sum())
    }

    /// Chore penalty recorded for the month containing `month`, if any
    pub async fn get_penalty(
        &self,
        house_id: &str,
        resident_id: &str,
        month: DateTime<Utc>,
    ) -> HeartsResult<Option<Heart>> {
        let heart_key: Option<String> = self
            .storage
            .get_json_opt(&Self::penalty_key(house_id, resident_id, month))
            .await?;
        match heart_key {
            Some(key) => Ok(self.storage.get_json_opt(&key).await?),
            None => Ok(None),
        }
    }

    /// Deduct `penalty` hearts for the month containing `month`.
    ///
    /// Does nothing (returning `None`) when the resident has no heart record
    /// yet or the month was already penalised.
    pub async fn add_penalty(
        &self,
        house_id: &str,
        resident_id: &str,
        month: DateTime<Utc>,
        penalty: f64,
        now: DateTime<Utc>,
    ) -> HeartsResult<Option<Heart>> {
        if !(penalty.is_finite() && penalty > 0.0) {
            return Err(HeartsError::InvalidValue(penalty));
        }
        if !self.is_initialised(house_id, resident_id).await? {
            debug!("Resident {} has no hearts yet, skipping penalty", resident_id);
            return Ok(None);
        }

        let (key, heart) = self
            .new_heart(house_id, resident_id, HeartKind::ChorePenalty, now, -penalty)
            .await?;
        let penalty_key = Self::penalty_key(house_id, resident_id, month);
        let batch = WriteBatch::new()
            .expect_absent(penalty_key.as_str())
            .put_json(penalty_key.as_str(), &key)?
            .put_json(key.as_str(), &heart)?;

        if !self.storage.commit(batch).await? {
            debug!("Resident {} already penalised for {}", resident_id, month_key(month));
            return Ok(None);
        }
        info!(
            "Penalised resident {} by {} hearts for {}",
            resident_id,
            penalty,
            month_key(month)
        );
        Ok(Some(heart))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mirror_core::storage::MemoryStorage;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    fn manager() -> HeartsManager {
        HeartsManager::new(Arc::new(MemoryStorage::new()), 5.0)
    }

    #[tokio::test]
    async fn test_initialise_once() {
        let hearts = manager();
        assert!(!hearts.is_initialised("H1", "R1").await.unwrap());

        assert!(hearts.initialise_resident("H1", "R1", now()).await.unwrap().is_some());
        assert!(hearts.initialise_resident("H1", "R1", now()).await.unwrap().is_none());

        assert!(hearts.is_initialised("H1", "R1").await.unwrap());
        assert_eq!(hearts.get_hearts("H1", "R1", now()).await.unwrap(), 5.0);
        assert_eq!(hearts.get_hearts("H1", "R1", now() - Duration::seconds(1)).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_penalty_requires_initialisation() {
        let hearts = manager();
        let month = now() - Duration::days(10);
        assert!(hearts.add_penalty("H1", "R1", month, 1.0, now()).await.unwrap().is_none());
        assert!(hearts.get_resident_hearts("H1", "R1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_penalty_once_per_month() {
        let hearts = manager();
        hearts.initialise_resident("H1", "R1", now() - Duration::days(40)).await.unwrap();

        let february = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let heart = hearts.add_penalty("H1", "R1", february, 2.5, now()).await.unwrap().unwrap();
        assert_eq!(heart.value, -2.5);
        assert_eq!(heart.kind, HeartKind::ChorePenalty);

        let again = hearts
            .add_penalty("H1", "R1", february + Duration::days(3), 1.0, now())
            .await
            .unwrap();
        assert!(again.is_none());

        assert_eq!(hearts.get_penalty("H1", "R1", february).await.unwrap(), Some(heart));
        assert_eq!(hearts.get_hearts("H1", "R1", now()).await.unwrap(), 2.5);

        // A different month is assessed independently
        let january = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert!(hearts.add_penalty("H1", "R1", january, 1.0, now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_penalty_must_be_positive() {
        let hearts = manager();
        let result = hearts.add_penalty("H1", "R1", now(), -1.0, now()).await;
        assert!(matches!(result, Err(HeartsError::InvalidValue(_))));
    }
}
