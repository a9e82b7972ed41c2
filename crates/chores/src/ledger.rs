//! Points ledger and monthly penalties
//!
//! Balances are never stored. Every query sums claims and gifts over its
//! window from the records themselves, so a claim rejected after the fact
//! is reflected everywhere at once (a giver can end up below zero).
//!
//! A few days into each month the previous month is assessed: residents owe
//! `points_per_resident` scaled by the share of the month they were active,
//! and every full `penalty_increment` of shortfall costs
//! `penalty_step_hearts` hearts.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use mirror_core::storage::{JsonStorage, WriteBatch};
use mirror_core::utils::{month_start, previous_month_start};
use mirror_hearts::{Heart, HeartKind};

use crate::error::{ChoresError, ChoresResult};
use crate::manager::{ChoresManager, GIFTS_PATH, GIFT_SEQUENCE, MAX_UPDATE_ATTEMPTS};
use crate::types::{PointGift, PointsSummary};

/// Hearts owed for a point shortfall of `deficit`
pub fn penalty_for_deficit(deficit: f64, increment: f64, step_hearts: f64) -> f64 {
    if deficit <= 0.0 || increment <= 0.0 {
        return 0.0;
    }
    let steps = (deficit / increment + 1e-9).floor();
    steps * step_hearts
}

impl ChoresManager {
    /// Claims and gifts of a resident with a timestamp accepted by `within`
    async fn summarize_points(
        &self,
        house_id: &str,
        resident_id: &str,
        within: impl Fn(DateTime<Utc>) -> bool,
    ) -> ChoresResult<PointsSummary> {
        let mut summary = PointsSummary::default();

        for claim in self.get_all_chore_claims(house_id).await? {
            if claim.valid && claim.claimed_by == resident_id && within(claim.claimed_at) {
                summary.claimed += claim.value;
            }
        }

        let gifts: Vec<PointGift> = self
            .storage
            .scan_json(&Self::house_prefix(GIFTS_PATH, house_id))
            .await?;
        for gift in gifts {
            if gift.resident_id != resident_id || !within(gift.gifted_at) {
                continue;
            }
            if gift.value >= 0.0 {
                summary.received += gift.value;
            } else {
                summary.given -= gift.value;
            }
        }

        summary.balance = summary.claimed + summary.received - summary.given;
        Ok(summary)
    }

    /// Points from valid (or pending) claims on one chore in `[start, end)`
    pub async fn get_chore_points(
        &self,
        house_id: &str,
        resident_id: &str,
        chore_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ChoresResult<f64> {
        let claims = self.get_chore_claims(house_id, chore_id).await?;
        Ok(claims
            .iter()
            .filter(|c| c.valid && c.claimed_by == resident_id && c.claimed_at >= start && c.claimed_at < end)
            .map(|c| c.value)
            .sum())
    }

    /// Net points in `[start, end)`: claims plus gifts received minus gifts given
    pub async fn get_all_chore_points(
        &self,
        house_id: &str,
        resident_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ChoresResult<f64> {
        let summary = self
            .summarize_points(house_id, resident_id, |t| t >= start && t < end)
            .await?;
        Ok(summary.balance)
    }

    /// Breakdown of a resident's points and chore penalties in `[start, end)`.
    ///
    /// Penalties are hearts, not points, so `balance` never includes them.
    /// They are reported on their own as `penalty_hearts`, a positive count of
    /// hearts deducted by penalties assessed in the window.
    pub async fn get_points_summary(
        &self,
        house_id: &str,
        resident_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ChoresResult<PointsSummary> {
        let mut summary = self
            .summarize_points(house_id, resident_id, |t| t >= start && t < end)
            .await?;

        let hearts = self.hearts.get_resident_hearts(house_id, resident_id).await?;
        summary.penalty_hearts = -hearts
            .iter()
            .filter(|h| matches!(h.kind, HeartKind::ChorePenalty))
            .filter(|h| h.generated_at >= start && h.generated_at < end)
            .map(|h| h.value)
            .sum::<f64>();
        Ok(summary)
    }

    /// Move `value` points from `giver` to `recipient`.
    ///
    /// The giver's balance for the month so far, `now` included, must cover
    /// the gift. Returns the giver's and the recipient's ledger rows.
    pub async fn gift_chore_points(
        &self,
        house_id: &str,
        giver: &str,
        recipient: &str,
        now: DateTime<Utc>,
        value: f64,
    ) -> ChoresResult<(PointGift, PointGift)> {
        if !(value.is_finite() && value > 0.0) {
            return Err(ChoresError::validation("Gifts must be a positive number of points"));
        }
        if giver == recipient {
            return Err(ChoresError::validation("Cannot gift points to yourself"));
        }
        self.admin.get_resident(house_id, giver).await?;
        let target = self.admin.get_resident(house_id, recipient).await?;
        if !target.active {
            return Err(ChoresError::validation(format!("Resident {} has left the house", recipient)));
        }

        let guard_key = Self::gift_guard_key(house_id, giver);
        let since = month_start(now);

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            // Gifts by the same giver are serialised through the guard key
            let last_gift = self.storage.get_json_versioned::<u64>(&guard_key).await?;

            let balance = self
                .summarize_points(house_id, giver, |t| t >= since && t <= now)
                .await?
                .balance;
            if balance < value {
                return Err(ChoresError::validation("Cannot gift more than the points balance"));
            }

            let giver_row = PointGift {
                id: self.storage.next_id(GIFT_SEQUENCE).await?,
                house_id: house_id.to_string(),
                resident_id: giver.to_string(),
                counterparty_id: recipient.to_string(),
                gifted_at: now,
                value: -value,
            };
            let recipient_row = PointGift {
                id: self.storage.next_id(GIFT_SEQUENCE).await?,
                house_id: house_id.to_string(),
                resident_id: recipient.to_string(),
                counterparty_id: giver.to_string(),
                gifted_at: now,
                value,
            };

            let batch = WriteBatch::new()
                .expect_current(guard_key.as_str(), last_gift.map(|(_, raw)| raw))
                .put_json(guard_key.as_str(), &giver_row.id)?
                .put_json(Self::gift_key(house_id, giver_row.id), &giver_row)?
                .put_json(Self::gift_key(house_id, recipient_row.id), &recipient_row)?;

            if self.storage.commit(batch).await? {
                info!("Resident {} gifted {:.2} points to {}", giver, value, recipient);
                return Ok((giver_row, recipient_row));
            }
            debug!("Concurrent gift by {}, rechecking balance", giver);
        }
        Err(ChoresError::Contention(format!("gifts of {}", giver)))
    }

    /// Hearts a resident owes for the month before the one containing `now`
    pub async fn calculate_penalty(&self, house_id: &str, resident_id: &str, now: DateTime<Utc>) -> ChoresResult<f64> {
        let period_start = previous_month_start(now);
        let period_end = month_start(now);

        let active = self
            .get_active_resident_percentage(house_id, resident_id, period_start)
            .await?;
        let owed = self.config.points_per_resident * active;
        let earned = self
            .get_all_chore_points(house_id, resident_id, period_start, period_end)
            .await?;

        Ok(penalty_for_deficit(
            owed - earned,
            self.config.penalty_increment,
            self.config.penalty_step_hearts,
        ))
    }

    /// Record last month's penalty once the assessment delay has passed.
    ///
    /// Returns `None` when it is too early, nothing is owed, the resident has
    /// no hearts yet, or the month was already assessed.
    pub async fn add_chore_penalty(
        &self,
        house_id: &str,
        resident_id: &str,
        now: DateTime<Utc>,
    ) -> ChoresResult<Option<Heart>> {
        let due = month_start(now) + Duration::seconds(self.config.penalty_delay_secs);
        if now < due {
            return Ok(None);
        }

        let penalty = self.calculate_penalty(house_id, resident_id, now).await?;
        if penalty <= 0.0 {
            return Ok(None);
        }

        let heart = self
            .hearts
            .add_penalty(house_id, resident_id, previous_month_start(now), penalty, now)
            .await?;
        Ok(heart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{add_chores, at, setup, t0, TestContext, HOUSE};

    fn penalty_time(month_of: DateTime<Utc>) -> DateTime<Utc> {
        mirror_core::utils::next_month_start(month_of) + Duration::seconds(259_200)
    }

    async fn claim_each(ctx: &TestContext, at: DateTime<Utc>, claims: &[(&str, f64)]) {
        let names: Vec<String> = (0..claims.len()).map(|i| format!("chore{}", i)).collect();
        for ((resident, value), name) in claims.iter().zip(&names) {
            let chore = ctx.chores.add_chore(HOUSE, name, serde_json::json!({})).await.unwrap();
            ctx.chores.set_chore_values(HOUSE, &[(chore.id, at, *value)]).await.unwrap();
            ctx.chores.claim_chore(HOUSE, chore.id, resident, at).await.unwrap();
        }
    }

    #[test]
    fn test_penalty_steps() {
        assert_eq!(penalty_for_deficit(9.0, 10.0, 0.5), 0.0);
        assert_eq!(penalty_for_deficit(10.0, 10.0, 0.5), 0.5);
        assert_eq!(penalty_for_deficit(20.0, 10.0, 0.5), 1.0);
        assert_eq!(penalty_for_deficit(31.0, 10.0, 0.5), 1.5);
        assert_eq!(penalty_for_deficit(-5.0, 10.0, 0.5), 0.0);
    }

    #[tokio::test]
    async fn test_points_in_range() {
        let now = t0();
        let end = now + Duration::minutes(1);
        let ctx = setup(&["R1", "R2"], now).await;
        let [dishes, sweeping] = add_chores(&ctx, ["dishes", "sweeping"]).await;
        ctx.chores
            .set_chore_values(HOUSE, &[(dishes, now, 10.0), (sweeping, now, 20.0)])
            .await
            .unwrap();
        ctx.chores.claim_chore(HOUSE, dishes, "R1", now).await.unwrap();
        ctx.chores.claim_chore(HOUSE, sweeping, "R1", now).await.unwrap();

        let month = month_start(now);
        assert_eq!(ctx.chores.get_all_chore_points(HOUSE, "R1", month, end).await.unwrap(), 30.0);
        assert_eq!(ctx.chores.get_chore_points(HOUSE, "R1", dishes, month, end).await.unwrap(), 10.0);
        assert_eq!(
            ctx.chores.get_all_chore_points(HOUSE, "R1", at(2000, 1, 1, 0), month).await.unwrap(),
            0.0
        );
        // The end of the window is excluded
        assert_eq!(ctx.chores.get_all_chore_points(HOUSE, "R1", month, now).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_calculate_penalties() {
        let now = t0();
        let ctx = setup(&["R1", "R2", "R3"], month_start(now)).await;
        claim_each(&ctx, now, &[("R1", 91.0), ("R2", 80.0), ("R3", 69.0)]).await;

        let when = penalty_time(now);
        assert_eq!(ctx.chores.calculate_penalty(HOUSE, "R1", when).await.unwrap(), 0.0);
        assert_eq!(ctx.chores.calculate_penalty(HOUSE, "R2", when).await.unwrap(), 1.0);
        assert_eq!(ctx.chores.calculate_penalty(HOUSE, "R3", when).await.unwrap(), 1.5);
    }

    #[tokio::test]
    async fn test_calculate_penalties_with_breaks() {
        let feb1 = at(3000, 2, 1, 0);
        let feb15 = at(3000, 2, 15, 0);
        let ctx = setup(&["R1", "R2", "R3"], t0()).await;
        claim_each(&ctx, feb1, &[("R1", 60.0), ("R2", 50.0), ("R3", 40.0)]).await;

        // Everyone takes half the month off
        for resident in ["R1", "R2", "R3"] {
            ctx.chores.add_chore_break(HOUSE, resident, feb1, feb15, "").await.unwrap();
        }

        let when = penalty_time(feb1);
        assert_eq!(ctx.chores.calculate_penalty(HOUSE, "R1", when).await.unwrap(), 0.0);
        assert_eq!(ctx.chores.calculate_penalty(HOUSE, "R2", when).await.unwrap(), 0.0);
        assert_eq!(ctx.chores.calculate_penalty(HOUSE, "R3", when).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_penalty_at_the_right_time() {
        let now = t0();
        let ctx = setup(&["R1"], month_start(now)).await;
        ctx.hearts.initialise_resident(HOUSE, "R1", now).await.unwrap();
        claim_each(&ctx, now, &[("R1", 50.0)]).await;

        let when = penalty_time(now);
        let early = ctx
            .chores
            .add_chore_penalty(HOUSE, "R1", when - Duration::milliseconds(1))
            .await
            .unwrap();
        assert!(early.is_none());

        let heart = ctx.chores.add_chore_penalty(HOUSE, "R1", when).await.unwrap().unwrap();
        assert_eq!(heart.value, -2.5);

        assert!(ctx.chores.add_chore_penalty(HOUSE, "R1", when).await.unwrap().is_none());
        assert_eq!(ctx.hearts.get_hearts(HOUSE, "R1", when).await.unwrap(), 2.5);

        let summary = ctx
            .chores
            .get_points_summary(HOUSE, "R1", month_start(when), when + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(summary.penalty_hearts, 2.5);
    }

    #[tokio::test]
    async fn test_points_summary_keeps_penalties_apart() {
        let now = t0();
        let ctx = setup(&["R1"], month_start(now)).await;
        ctx.hearts.initialise_resident(HOUSE, "R1", now).await.unwrap();
        claim_each(&ctx, now, &[("R1", 50.0)]).await;

        let when = penalty_time(now);
        ctx.chores.add_chore_penalty(HOUSE, "R1", when).await.unwrap().unwrap();

        // The window holds both the claim and the penalty it caused
        let summary = ctx
            .chores
            .get_points_summary(HOUSE, "R1", month_start(now), when + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(summary.claimed, 50.0);
        assert_eq!(summary.balance, 50.0);
        assert_eq!(summary.penalty_hearts, 2.5);
        assert_eq!(
            ctx.chores
                .get_all_chore_points(HOUSE, "R1", month_start(now), when + Duration::days(1))
                .await
                .unwrap(),
            50.0
        );
    }

    #[tokio::test]
    async fn test_no_penalty_before_initialised() {
        let now = t0();
        let ctx = setup(&["R1"], month_start(now)).await;
        claim_each(&ctx, now, &[("R1", 50.0)]).await;

        let when = penalty_time(now);
        assert!(ctx.chores.add_chore_penalty(HOUSE, "R1", when).await.unwrap().is_none());

        ctx.hearts.initialise_resident(HOUSE, "R1", now).await.unwrap();
        let heart = ctx.chores.add_chore_penalty(HOUSE, "R1", when).await.unwrap().unwrap();
        assert_eq!(heart.value, -2.5);
    }

    #[tokio::test]
    async fn test_gift_points() {
        let now = t0();
        let end = now + Duration::minutes(1);
        let ctx = setup(&["R1", "R2"], now).await;
        claim_each(&ctx, now, &[("R1", 10.0)]).await;

        ctx.chores.gift_chore_points(HOUSE, "R1", "R2", now, 6.0).await.unwrap();

        let month = month_start(now);
        assert_eq!(ctx.chores.get_all_chore_points(HOUSE, "R1", month, end).await.unwrap(), 4.0);
        assert_eq!(ctx.chores.get_all_chore_points(HOUSE, "R2", month, end).await.unwrap(), 6.0);

        let summary = ctx.chores.get_points_summary(HOUSE, "R1", month, end).await.unwrap();
        assert_eq!(summary.claimed, 10.0);
        assert_eq!(summary.given, 6.0);
        assert_eq!(summary.balance, 4.0);

        // Exactly the remaining balance is fine, one more point is not
        ctx.chores.gift_chore_points(HOUSE, "R1", "R2", now, 4.0).await.unwrap();
        let err = ctx.chores.gift_chore_points(HOUSE, "R1", "R2", now, 1.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_cannot_gift_more_than_balance() {
        let now = t0();
        let ctx = setup(&["R1", "R2"], now).await;

        let err = ctx.chores.gift_chore_points(HOUSE, "R1", "R2", now, 10.0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let to_self = ctx.chores.gift_chore_points(HOUSE, "R1", "R1", now, 1.0).await.unwrap_err();
        assert_eq!(to_self.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_negative_balance_after_rejected_claim() {
        let now = t0();
        let soon = now + Duration::minutes(1);
        let poll_end = now + Duration::seconds(172_800);
        let ctx = setup(&["R1", "R2"], now).await;
        let [dishes] = add_chores(&ctx, ["dishes"]).await;
        ctx.chores.set_chore_values(HOUSE, &[(dishes, now, 10.0)]).await.unwrap();
        let claim = ctx.chores.claim_chore(HOUSE, dishes, "R1", now).await.unwrap();
        ctx.chores.gift_chore_points(HOUSE, "R1", "R2", now, 6.0).await.unwrap();

        ctx.polls.submit_vote(claim.poll_id, "R1", soon, Some(false)).await.unwrap();
        ctx.polls.submit_vote(claim.poll_id, "R2", soon, Some(false)).await.unwrap();
        ctx.chores.resolve_chore_claims(HOUSE, poll_end).await.unwrap();

        let month = month_start(now);
        assert_eq!(ctx.chores.get_all_chore_points(HOUSE, "R1", month, poll_end).await.unwrap(), -6.0);
        assert_eq!(ctx.chores.get_all_chore_points(HOUSE, "R2", month, poll_end).await.unwrap(), 6.0);
    }
}
