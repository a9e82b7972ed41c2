//! Chore valuation
//!
//! Each chore accrues value as a stream of immutable increments. An update
//! credits the whole hours elapsed since the house's valuation cursor, spread
//! over chores by ranking, and moves the cursor forward by exactly those
//! hours, so successive updates partition time with no gaps or overlap. The
//! cursor only moves through a guarded commit: of two concurrent updates one
//! wins and the other finds nothing left to credit.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use mirror_core::storage::{pad_id, JsonStorage, WriteBatch};
use mirror_core::utils::hours_in_month;

use crate::error::{ChoresError, ChoresResult};
use crate::manager::{ChoresManager, MAX_UPDATE_ATTEMPTS, VALUE_SEQUENCE};
use crate::types::{ChoreRanking, ChoreValue, ChoreValueMetadata, CurrentChoreValue};

impl ChoresManager {
    async fn get_value_rows(&self, house_id: &str, chore_id: u64) -> ChoresResult<Vec<ChoreValue>> {
        Ok(self
            .storage
            .scan_json(&Self::values_prefix(house_id, chore_id))
            .await?)
    }

    pub(crate) async fn sum_values(
        &self,
        house_id: &str,
        chore_id: u64,
        after: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> ChoresResult<f64> {
        let rows = self.get_value_rows(house_id, chore_id).await?;
        Ok(rows
            .iter()
            .filter(|v| after.map_or(true, |start| v.valued_at > start) && v.valued_at <= until)
            .map(|v| v.value)
            .sum())
    }

    /// Value credited to a chore in `(start, end]`
    pub async fn get_chore_value(
        &self,
        house_id: &str,
        chore_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ChoresResult<f64> {
        self.sum_values(house_id, chore_id, Some(start), end).await
    }

    /// Value accrued by a chore since its last valid claim before `now`
    pub async fn get_current_chore_value(
        &self,
        house_id: &str,
        chore_id: u64,
        now: DateTime<Utc>,
    ) -> ChoresResult<f64> {
        let last_claim = self.last_valid_claim_before(house_id, chore_id, now, None).await?;
        self.sum_values(house_id, chore_id, last_claim.map(|c| c.claimed_at), now)
            .await
    }

    /// Current value of every active chore
    pub async fn get_current_chore_values(
        &self,
        house_id: &str,
        now: DateTime<Utc>,
    ) -> ChoresResult<Vec<CurrentChoreValue>> {
        let mut values = Vec::new();
        for chore in self.get_chores(house_id).await? {
            let value = self.get_current_chore_value(house_id, chore.id, now).await?;
            values.push(CurrentChoreValue {
                chore_id: chore.id,
                name: chore.name,
                value,
            });
        }
        Ok(values)
    }

    /// Ranking of the active chores, highest first
    pub async fn get_current_chore_rankings(&self, house_id: &str) -> ChoresResult<Vec<ChoreRanking>> {
        let chores = self.get_chores(house_id).await?;
        let residents: Vec<String> = self
            .admin
            .get_residents(house_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let preferences = self.get_active_chore_preferences(house_id).await?;

        let chore_ids: Vec<u64> = chores.iter().map(|c| c.id).collect();
        let shares = self.ranker.rank(&chore_ids, &residents, &preferences);

        let mut rankings: Vec<ChoreRanking> = chores
            .into_iter()
            .zip(shares)
            .map(|(chore, ranking)| ChoreRanking {
                chore_id: chore.id,
                name: chore.name,
                ranking,
            })
            .collect();
        rankings.sort_by(|a, b| b.ranking.total_cmp(&a.ranking));
        Ok(rankings)
    }

    async fn get_value_cursor(&self, house_id: &str) -> ChoresResult<Option<(DateTime<Utc>, Vec<u8>)>> {
        Ok(self
            .storage
            .get_json_versioned(&Self::value_cursor_key(house_id))
            .await?)
    }

    /// Whole hours to credit at `now`, and where the cursor lands afterwards
    fn pending_interval(&self, cursor: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (i64, DateTime<Utc>) {
        match cursor {
            None => (self.config.bootstrap_hours, now),
            Some(cursor) => {
                let hours = (now - cursor).num_hours().max(0);
                (hours, cursor + Duration::hours(hours))
            }
        }
    }

    fn interval_scalar(&self, hours: i64, now: DateTime<Utc>) -> f64 {
        hours as f64 / (hours_in_month(now) as f64 * self.config.valuation_denominator)
    }

    /// Share of the monthly budget an update at `now` would credit
    pub async fn get_chore_value_interval_scalar(&self, house_id: &str, now: DateTime<Utc>) -> ChoresResult<f64> {
        let cursor = self.get_value_cursor(house_id).await?.map(|(c, _)| c);
        let (hours, _) = self.pending_interval(cursor, now);
        Ok(self.interval_scalar(hours, now))
    }

    /// Record value increments directly, moving the valuation cursor up to
    /// the latest of them
    pub async fn set_chore_values(
        &self,
        house_id: &str,
        increments: &[(u64, DateTime<Utc>, f64)],
    ) -> ChoresResult<Vec<ChoreValue>> {
        for (chore_id, _, value) in increments {
            self.get_chore(house_id, *chore_id).await?;
            if !value.is_finite() || *value < 0.0 {
                return Err(ChoresError::validation("Chore values must be non-negative"));
            }
        }
        let Some(latest) = increments.iter().map(|(_, at, _)| *at).max() else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::with_capacity(increments.len());
        for (chore_id, valued_at, value) in increments {
            rows.push(ChoreValue {
                id: self.storage.next_id(VALUE_SEQUENCE).await?,
                house_id: house_id.to_string(),
                chore_id: *chore_id,
                valued_at: *valued_at,
                value: *value,
                metadata: None,
            });
        }

        let cursor_key = Self::value_cursor_key(house_id);
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get_value_cursor(house_id).await?;
            let mut batch = WriteBatch::new();
            match current {
                Some((cursor, raw)) => {
                    batch = batch.expect_value(cursor_key.as_str(), raw);
                    if latest > cursor {
                        batch = batch.put_json(cursor_key.as_str(), &latest)?;
                    }
                }
                None => {
                    batch = batch
                        .expect_absent(cursor_key.as_str())
                        .put_json(cursor_key.as_str(), &latest)?;
                }
            }
            for row in &rows {
                let key = format!("{}{}", Self::values_prefix(house_id, row.chore_id), pad_id(row.id));
                batch = batch.put_json(key, row)?;
            }

            if self.storage.commit(batch).await? {
                debug!("Recorded {} chore values for house {}", rows.len(), house_id);
                return Ok(rows);
            }
        }
        Err(ChoresError::Contention(format!("valuation of house {}", house_id)))
    }

    /// Credit the value accrued since the last update.
    ///
    /// Returns the new increments, one per active chore, or nothing when
    /// less than an hour has passed.
    pub async fn update_chore_values(&self, house_id: &str, now: DateTime<Utc>) -> ChoresResult<Vec<ChoreValue>> {
        let cursor_key = Self::value_cursor_key(house_id);

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = self.get_value_cursor(house_id).await?;
            let (cursor, raw) = match current {
                Some((cursor, raw)) => (Some(cursor), Some(raw)),
                None => (None, None),
            };

            let (hours, next_cursor) = self.pending_interval(cursor, now);
            if hours == 0 {
                return Ok(Vec::new());
            }

            let scalar = self.interval_scalar(hours, now);
            let residents = self.get_active_resident_count(house_id, now).await?;
            let budget = self.config.points_per_resident
                * residents as f64
                * self.config.inflation_factor
                * scalar;

            let mut batch = WriteBatch::new()
                .expect_current(cursor_key.as_str(), raw)
                .put_json(cursor_key.as_str(), &next_cursor)?;

            let mut rows = Vec::new();
            for ranking in self.get_current_chore_rankings(house_id).await? {
                let row = ChoreValue {
                    id: self.storage.next_id(VALUE_SEQUENCE).await?,
                    house_id: house_id.to_string(),
                    chore_id: ranking.chore_id,
                    valued_at: next_cursor,
                    value: budget * ranking.ranking,
                    metadata: Some(ChoreValueMetadata {
                        ranking: ranking.ranking,
                        residents,
                        scalar,
                    }),
                };
                let key = format!("{}{}", Self::values_prefix(house_id, row.chore_id), pad_id(row.id));
                batch = batch.put_json(key, &row)?;
                rows.push(row);
            }

            if self.storage.commit(batch).await? {
                info!(
                    "Credited {} hours of chore value ({:.2} points) in house {}",
                    hours, budget, house_id
                );
                return Ok(rows);
            }
            debug!("Valuation cursor of house {} moved, retrying", house_id);
        }
        Err(ChoresError::Contention(format!("valuation of house {}", house_id)))
    }

    /// Run any pending update, then report current values
    pub async fn get_updated_chore_values(
        &self,
        house_id: &str,
        now: DateTime<Utc>,
    ) -> ChoresResult<Vec<CurrentChoreValue>> {
        self.update_chore_values(house_id, now).await?;
        self.get_current_chore_values(house_id, now).await
    }
}
