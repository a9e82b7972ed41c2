//! Chore breaks and active residency
//!
//! A break excuses a resident from chores for `[start_date, end_date)`.
//! Residents on break do not count towards the house budget, and owe
//! points only for the part of a month they were active.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::info;

use mirror_core::storage::JsonStorage;
use mirror_core::utils::{day_start, days_in_month, month_start, next_month_start};

use crate::error::{ChoresError, ChoresResult};
use crate::manager::{ChoresManager, BREAKS_PATH, BREAK_SEQUENCE};
use crate::types::ChoreBreak;

/// Whole days in the union of `intervals` after clipping them to `[start, end)`.
///
/// Bounds are truncated to midnight, so a day takes the state the resident
/// moves into during it.
fn covered_days(
    mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> i64 {
    intervals = intervals
        .into_iter()
        .map(|(from, to)| (day_start(from).max(start), day_start(to).min(end)))
        .filter(|(from, to)| from < to)
        .collect();
    intervals.sort();

    let mut total = 0;
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for (from, to) in intervals {
        current = match current {
            Some((cur_from, cur_to)) if from <= cur_to => Some((cur_from, cur_to.max(to))),
            Some((cur_from, cur_to)) => {
                total += (cur_to - cur_from).num_days();
                Some((from, to))
            }
            None => Some((from, to)),
        };
    }
    if let Some((from, to)) = current {
        total += (to - from).num_days();
    }
    total
}

impl ChoresManager {
    pub async fn add_chore_break(
        &self,
        house_id: &str,
        resident_id: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        circumstance: &str,
    ) -> ChoresResult<ChoreBreak> {
        if start_date >= end_date {
            return Err(ChoresError::validation("A break must end after it starts"));
        }
        self.admin.get_resident(house_id, resident_id).await?;

        let chore_break = ChoreBreak {
            id: self.storage.next_id(BREAK_SEQUENCE).await?,
            house_id: house_id.to_string(),
            resident_id: resident_id.to_string(),
            start_date,
            end_date,
            circumstance: circumstance.to_string(),
        };
        self.storage
            .put_json(&Self::break_key(house_id, chore_break.id), &chore_break)
            .await?;

        info!(
            "Resident {} on break from {} to {}",
            resident_id, start_date, end_date
        );
        Ok(chore_break)
    }

    pub async fn delete_chore_break(&self, house_id: &str, break_id: u64) -> ChoresResult<ChoreBreak> {
        let key = Self::break_key(house_id, break_id);
        let chore_break: ChoreBreak = self
            .storage
            .get_json_opt(&key)
            .await?
            .ok_or_else(|| ChoresError::NotFound(format!("Break {}", break_id)))?;
        self.storage.delete(&key).await?;
        info!("Deleted break {} of resident {}", break_id, chore_break.resident_id);
        Ok(chore_break)
    }

    /// Every break ever recorded in the house
    pub async fn get_all_chore_breaks(&self, house_id: &str) -> ChoresResult<Vec<ChoreBreak>> {
        Ok(self
            .storage
            .scan_json(&Self::house_prefix(BREAKS_PATH, house_id))
            .await?)
    }

    /// Breaks of active residents that cover `now`
    pub async fn get_chore_breaks(&self, house_id: &str, now: DateTime<Utc>) -> ChoresResult<Vec<ChoreBreak>> {
        let active: HashSet<String> = self
            .admin
            .get_residents(house_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let breaks = self.get_all_chore_breaks(house_id).await?;
        Ok(breaks
            .into_iter()
            .filter(|b| b.covers(now) && active.contains(&b.resident_id))
            .collect())
    }

    /// Residents who vote at `now` and are not on break
    pub async fn get_active_resident_count(&self, house_id: &str, now: DateTime<Utc>) -> ChoresResult<usize> {
        let on_break: HashSet<String> = self
            .get_chore_breaks(house_id, now)
            .await?
            .into_iter()
            .map(|b| b.resident_id)
            .collect();
        let voting = self.admin.get_voting_residents(house_id, now).await?;
        Ok(voting.iter().filter(|r| !on_break.contains(&r.id)).count())
    }

    /// Share of the days in the month containing `now` a resident was active
    /// and not on break.
    ///
    /// Time before the resident became active and time after they became
    /// exempt count as breaks. Residents who left the house get 0.
    pub async fn get_active_resident_percentage(
        &self,
        house_id: &str,
        resident_id: &str,
        now: DateTime<Utc>,
    ) -> ChoresResult<f64> {
        let resident = self.admin.get_resident(house_id, resident_id).await?;
        if !resident.active {
            return Ok(0.0);
        }

        let start = month_start(now);
        let end = next_month_start(now);

        let mut excluded: Vec<(DateTime<Utc>, DateTime<Utc>)> = self
            .get_all_chore_breaks(house_id)
            .await?
            .into_iter()
            .filter(|b| b.resident_id == resident_id)
            .map(|b| (b.start_date, b.end_date))
            .collect();
        if let Some(active_at) = resident.active_at {
            excluded.push((start, active_at));
        }
        if let Some(exempt_at) = resident.exempt_at {
            excluded.push((exempt_at, end));
        }

        let month = days_in_month(now);
        let away = covered_days(excluded, start, end);
        Ok((month - away) as f64 / month as f64)
    }
}
