//! Claim lifecycle
//!
//! A claim snapshots the value a chore has accrued and opens a poll. Claims
//! start out valid, so a pending claim already holds its window of value
//! against later claims. At resolution the value is recomputed against the
//! claims that survived, which hands the window of a rejected claim to the
//! next one.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use mirror_core::storage::{JsonStorage, WriteBatch};
use mirror_polls::PollTally;

use crate::error::{ChoresError, ChoresResult};
use crate::manager::{ChoresManager, CLAIMS_PATH, CLAIM_SEQUENCE, MAX_UPDATE_ATTEMPTS};
use crate::types::ChoreClaim;

impl ChoresManager {
    /// Claim the value a chore has accrued up to `now`
    pub async fn claim_chore(
        &self,
        house_id: &str,
        chore_id: u64,
        resident_id: &str,
        now: DateTime<Utc>,
    ) -> ChoresResult<ChoreClaim> {
        let chore = self.get_chore(house_id, chore_id).await?;
        if !chore.active {
            return Err(ChoresError::validation(format!("Chore {} is no longer active", chore.name)));
        }
        self.admin.get_resident(house_id, resident_id).await?;

        let value = self.get_current_chore_value(house_id, chore_id, now).await?;
        if value <= 0.0 {
            return Err(ChoresError::validation("Cannot claim a zero-value chore"));
        }

        let poll = self
            .polls
            .create_poll(
                house_id,
                now,
                Duration::seconds(self.config.claim_poll_secs),
                self.config.claim_min_votes,
            )
            .await?;

        let claim = ChoreClaim {
            id: self.storage.next_id(CLAIM_SEQUENCE).await?,
            house_id: house_id.to_string(),
            chore_id,
            claimed_by: resident_id.to_string(),
            claimed_at: now,
            value,
            poll_id: poll.id,
            resolved_at: None,
            valid: true,
        };
        self.storage
            .put_json(&Self::claim_key(house_id, claim.id), &claim)
            .await?;

        info!(
            "Resident {} claimed {} for {:.2} points (claim {}, poll {})",
            resident_id, chore.name, value, claim.id, poll.id
        );
        Ok(claim)
    }

    async fn get_chore_claim_versioned(&self, house_id: &str, claim_id: u64) -> ChoresResult<(ChoreClaim, Vec<u8>)> {
        self.storage
            .get_json_versioned(&Self::claim_key(house_id, claim_id))
            .await?
            .ok_or_else(|| ChoresError::NotFound(format!("Claim {}", claim_id)))
    }

    pub async fn get_chore_claim(&self, house_id: &str, claim_id: u64) -> ChoresResult<ChoreClaim> {
        Ok(self.get_chore_claim_versioned(house_id, claim_id).await?.0)
    }

    /// Every claim in the house, oldest first
    pub async fn get_all_chore_claims(&self, house_id: &str) -> ChoresResult<Vec<ChoreClaim>> {
        Ok(self
            .storage
            .scan_json(&Self::house_prefix(CLAIMS_PATH, house_id))
            .await?)
    }

    /// Every claim on one chore, oldest first
    pub async fn get_chore_claims(&self, house_id: &str, chore_id: u64) -> ChoresResult<Vec<ChoreClaim>> {
        let claims = self.get_all_chore_claims(house_id).await?;
        Ok(claims.into_iter().filter(|c| c.chore_id == chore_id).collect())
    }

    /// Most recent claim on a chore made at or before `now` that was not rejected
    pub async fn get_latest_chore_claim(
        &self,
        house_id: &str,
        chore_id: u64,
        now: DateTime<Utc>,
    ) -> ChoresResult<Option<ChoreClaim>> {
        let claims = self.get_chore_claims(house_id, chore_id).await?;
        Ok(claims
            .into_iter()
            .filter(|c| c.valid && c.claimed_at <= now)
            .max_by_key(|c| (c.claimed_at, c.id)))
    }

    /// A resident's most valuable valid claim in `[start, end)`
    pub async fn get_largest_chore_claim(
        &self,
        house_id: &str,
        resident_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ChoresResult<Option<ChoreClaim>> {
        let claims = self.get_all_chore_claims(house_id).await?;
        Ok(claims
            .into_iter()
            .filter(|c| c.valid && c.claimed_by == resident_id && c.claimed_at >= start && c.claimed_at < end)
            .max_by(|a, b| a.value.total_cmp(&b.value)))
    }

    /// Latest claim holding value ahead of position `(at, before_id)`.
    ///
    /// Claims are ordered by time, then id; with no `before_id` every claim
    /// made at `at` counts as earlier.
    pub(crate) async fn last_valid_claim_before(
        &self,
        house_id: &str,
        chore_id: u64,
        at: DateTime<Utc>,
        before_id: Option<u64>,
    ) -> ChoresResult<Option<ChoreClaim>> {
        let claims = self.get_chore_claims(house_id, chore_id).await?;
        Ok(claims
            .into_iter()
            .filter(|c| c.valid)
            .filter(|c| c.claimed_at < at || (c.claimed_at == at && before_id.map_or(true, |id| c.id < id)))
            .max_by_key(|c| (c.claimed_at, c.id)))
    }

    /// Settle a claim whose poll has closed.
    ///
    /// Earlier unresolved claims on the same chore are settled first, since a
    /// claim's value runs from the last valid claim before it. If one of their
    /// polls is still open the claim has to wait. Returns `None` if the claim
    /// was already resolved.
    pub async fn resolve_chore_claim(
        &self,
        house_id: &str,
        claim_id: u64,
        now: DateTime<Utc>,
    ) -> ChoresResult<Option<ChoreClaim>> {
        let claim = self.get_chore_claim(house_id, claim_id).await?;
        if claim.is_resolved() {
            debug!("Claim {} already resolved", claim_id);
            return Ok(None);
        }

        let mut earlier: Vec<ChoreClaim> = self
            .get_chore_claims(house_id, claim.chore_id)
            .await?
            .into_iter()
            .filter(|c| !c.is_resolved() && (c.claimed_at, c.id) < (claim.claimed_at, claim.id))
            .collect();
        earlier.sort_by_key(|c| (c.claimed_at, c.id));

        for pending in earlier {
            debug!("Settling claim {} ahead of claim {}", pending.id, claim_id);
            self.settle_chore_claim(house_id, pending.id, now).await?;
        }
        self.settle_chore_claim(house_id, claim_id, now).await
    }

    async fn settle_chore_claim(
        &self,
        house_id: &str,
        claim_id: u64,
        now: DateTime<Utc>,
    ) -> ChoresResult<Option<ChoreClaim>> {
        let key = Self::claim_key(house_id, claim_id);

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (claim, raw) = self.get_chore_claim_versioned(house_id, claim_id).await?;
            if claim.is_resolved() {
                debug!("Claim {} already resolved", claim_id);
                return Ok(None);
            }

            let poll = self.polls.get_poll(claim.poll_id).await?;
            if !poll.is_closed(now) {
                return Err(ChoresError::PollNotClosed(poll.id));
            }

            let votes = self.polls.get_poll_votes(poll.id).await?;
            let tally = PollTally::count(&poll, &votes);
            let valid = tally.passes(poll.min_votes);

            let value = if valid {
                let previous = self
                    .last_valid_claim_before(house_id, claim.chore_id, claim.claimed_at, Some(claim.id))
                    .await?;
                self.sum_values(
                    house_id,
                    claim.chore_id,
                    previous.map(|c| c.claimed_at),
                    claim.claimed_at,
                )
                .await?
            } else {
                0.0
            };

            let resolved = ChoreClaim {
                value,
                valid,
                resolved_at: Some(now),
                ..claim
            };
            let batch = WriteBatch::new()
                .expect_value(key.as_str(), raw)
                .put_json(key.as_str(), &resolved)?;

            if self.storage.commit(batch).await? {
                info!(
                    "Resolved claim {} as {} ({} yays, {} nays, {:.2} points)",
                    claim_id,
                    if valid { "valid" } else { "invalid" },
                    tally.yays,
                    tally.nays,
                    value
                );
                return Ok(Some(resolved));
            }
            debug!("Claim {} changed during resolution, retrying", claim_id);
        }
        Err(ChoresError::Contention(format!("claim {}", claim_id)))
    }

    /// Resolve every pending claim of the house whose poll has closed, oldest first.
    ///
    /// Claims whose poll is still open are skipped; other failures are logged
    /// and do not stop the batch.
    pub async fn resolve_chore_claims(&self, house_id: &str, now: DateTime<Utc>) -> ChoresResult<Vec<ChoreClaim>> {
        let mut pending: Vec<ChoreClaim> = self
            .get_all_chore_claims(house_id)
            .await?
            .into_iter()
            .filter(|c| !c.is_resolved())
            .collect();
        pending.sort_by_key(|c| (c.claimed_at, c.id));

        let mut resolved = Vec::new();
        for claim in pending {
            match self.resolve_chore_claim(house_id, claim.id, now).await {
                Ok(Some(claim)) => resolved.push(claim),
                Ok(None) | Err(ChoresError::PollNotClosed(_)) => {}
                Err(e) => warn!("Failed to resolve claim {}: {}", claim.id, e),
            }
        }
        Ok(resolved)
    }
}
