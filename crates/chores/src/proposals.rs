//! Proposal lifecycle
//!
//! Adding, editing and deleting chores goes through a house vote. The
//! number of yes votes a proposal needs is fixed when it is created, from
//! the share of voting residents at that moment. A passing proposal is
//! applied in the same commit that marks it resolved.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use mirror_core::storage::{JsonStorage, WriteBatch};
use mirror_polls::PollTally;

use crate::error::{ChoresError, ChoresResult};
use crate::manager::{ChoresManager, MAX_UPDATE_ATTEMPTS, PROPOSALS_PATH, PROPOSAL_SEQUENCE};
use crate::registry::validate_name;
use crate::types::{ChoreProposal, ProposalKind};

/// Yes votes needed when `voters` residents can vote
pub fn proposal_min_votes(min_pct: f64, voters: usize) -> u32 {
    let needed = (min_pct * voters as f64 - 1e-9).ceil();
    (needed.max(1.0)) as u32
}

impl ChoresManager {
    async fn create_chore_proposal(
        &self,
        house_id: &str,
        proposed_by: &str,
        chore_id: Option<u64>,
        name: String,
        metadata: serde_json::Value,
        active: bool,
        now: DateTime<Utc>,
    ) -> ChoresResult<ChoreProposal> {
        self.admin.get_resident(house_id, proposed_by).await?;

        let voters = self.admin.get_voting_residents(house_id, now).await?.len();
        let min_votes = proposal_min_votes(self.config.proposal_min_pct, voters);
        let poll = self
            .polls
            .create_poll(
                house_id,
                now,
                Duration::seconds(self.config.proposal_poll_secs),
                min_votes,
            )
            .await?;

        let proposal = ChoreProposal {
            id: self.storage.next_id(PROPOSAL_SEQUENCE).await?,
            house_id: house_id.to_string(),
            proposed_by: proposed_by.to_string(),
            proposed_at: now,
            chore_id,
            name,
            metadata,
            active,
            poll_id: poll.id,
            resolved_at: None,
            valid: false,
        };
        self.storage
            .put_json(&Self::proposal_key(house_id, proposal.id), &proposal)
            .await?;

        info!(
            "Resident {} proposed to {:?} chore {} (proposal {}, {} votes needed)",
            proposed_by,
            proposal.kind(),
            proposal.name,
            proposal.id,
            min_votes
        );
        Ok(proposal)
    }

    /// Propose a new chore, or overwriting the one with the same name
    pub async fn create_add_chore_proposal(
        &self,
        house_id: &str,
        proposed_by: &str,
        name: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> ChoresResult<ChoreProposal> {
        let name = validate_name(name)?;
        self.create_chore_proposal(house_id, proposed_by, None, name, metadata, true, now)
            .await
    }

    pub async fn create_edit_chore_proposal(
        &self,
        house_id: &str,
        proposed_by: &str,
        chore_id: u64,
        name: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> ChoresResult<ChoreProposal> {
        let name = validate_name(name)?;
        self.get_chore(house_id, chore_id).await?;
        self.create_chore_proposal(house_id, proposed_by, Some(chore_id), name, metadata, true, now)
            .await
    }

    pub async fn create_delete_chore_proposal(
        &self,
        house_id: &str,
        proposed_by: &str,
        chore_id: u64,
        now: DateTime<Utc>,
    ) -> ChoresResult<ChoreProposal> {
        let chore = self.get_chore(house_id, chore_id).await?;
        self.create_chore_proposal(
            house_id,
            proposed_by,
            Some(chore_id),
            chore.name,
            chore.metadata,
            false,
            now,
        )
        .await
    }

    async fn get_chore_proposal_versioned(
        &self,
        house_id: &str,
        proposal_id: u64,
    ) -> ChoresResult<(ChoreProposal, Vec<u8>)> {
        self.storage
            .get_json_versioned(&Self::proposal_key(house_id, proposal_id))
            .await?
            .ok_or_else(|| ChoresError::NotFound(format!("Proposal {}", proposal_id)))
    }

    pub async fn get_chore_proposal(&self, house_id: &str, proposal_id: u64) -> ChoresResult<ChoreProposal> {
        Ok(self.get_chore_proposal_versioned(house_id, proposal_id).await?.0)
    }

    /// Every proposal of the house, oldest first
    pub async fn get_chore_proposals(&self, house_id: &str) -> ChoresResult<Vec<ChoreProposal>> {
        Ok(self
            .storage
            .scan_json(&Self::house_prefix(PROPOSALS_PATH, house_id))
            .await?)
    }

    /// Settle a proposal whose poll has closed, applying it if it passed
    pub async fn resolve_chore_proposal(
        &self,
        house_id: &str,
        proposal_id: u64,
        now: DateTime<Utc>,
    ) -> ChoresResult<ChoreProposal> {
        let key = Self::proposal_key(house_id, proposal_id);

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let (proposal, raw) = self.get_chore_proposal_versioned(house_id, proposal_id).await?;
            if proposal.is_resolved() {
                return Err(ChoresError::AlreadyResolved(format!("Proposal {}", proposal_id)));
            }

            let poll = self.polls.get_poll(proposal.poll_id).await?;
            if !poll.is_closed(now) {
                return Err(ChoresError::PollNotClosed(poll.id));
            }

            let votes = self.polls.get_poll_votes(poll.id).await?;
            let tally = PollTally::count(&poll, &votes);
            let guard = || WriteBatch::new().expect_value(key.as_str(), raw.clone());

            let applied = if tally.passes(poll.min_votes) {
                let metadata = proposal.metadata.clone();
                match (proposal.kind(), proposal.chore_id) {
                    (ProposalKind::Add, _) => Some(
                        self.upsert_chore_batch(guard(), house_id, &proposal.name, metadata)
                            .await?
                            .0,
                    ),
                    (ProposalKind::Edit, Some(chore_id)) => {
                        let staged = self
                            .edit_chore_batch(guard(), house_id, chore_id, &proposal.name, metadata)
                            .await?;
                        if staged.is_none() {
                            warn!(
                                "Proposal {} passed but chore name {} is taken, not applied",
                                proposal_id, proposal.name
                            );
                        }
                        staged.map(|(batch, _)| batch)
                    }
                    (ProposalKind::Delete, Some(chore_id)) => {
                        Some(self.delete_chore_batch(guard(), house_id, chore_id).await?.0)
                    }
                    (_, None) => None,
                }
            } else {
                None
            };

            let valid = applied.is_some();
            let resolved = ChoreProposal {
                resolved_at: Some(now),
                valid,
                ..proposal
            };
            let batch = applied.unwrap_or_else(guard).put_json(key.as_str(), &resolved)?;

            if self.storage.commit(batch).await? {
                info!(
                    "Resolved proposal {} as {} ({} yays, {} nays)",
                    proposal_id,
                    if valid { "applied" } else { "rejected" },
                    tally.yays,
                    tally.nays
                );
                return Ok(resolved);
            }
            debug!("Proposal {} or its chore changed during resolution, retrying", proposal_id);
        }
        Err(ChoresError::Contention(format!("proposal {}", proposal_id)))
    }

    /// Resolve every open proposal of the house whose poll has closed, oldest first
    pub async fn resolve_chore_proposals(
        &self,
        house_id: &str,
        now: DateTime<Utc>,
    ) -> ChoresResult<Vec<ChoreProposal>> {
        let pending: Vec<ChoreProposal> = self
            .get_chore_proposals(house_id)
            .await?
            .into_iter()
            .filter(|p| !p.is_resolved())
            .collect();

        let mut resolved = Vec::new();
        for proposal in pending {
            match self.resolve_chore_proposal(house_id, proposal.id, now).await {
                Ok(proposal) => resolved.push(proposal),
                Err(ChoresError::PollNotClosed(_)) | Err(ChoresError::AlreadyResolved(_)) => {}
                Err(e) => warn!("Failed to resolve proposal {}: {}", proposal.id, e),
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{setup, t0, TestContext, HOUSE};
    use serde_json::json;

    fn proposal_end() -> DateTime<Utc> {
        t0() + Duration::seconds(172_800)
    }

    async fn vote(ctx: &TestContext, proposal: &ChoreProposal, resident: &str, yay: bool) {
        ctx.polls
            .submit_vote(proposal.poll_id, resident, t0(), Some(yay))
            .await
            .unwrap();
    }

    async fn pass(ctx: &TestContext, proposal: &ChoreProposal) -> ChoreProposal {
        vote(ctx, proposal, "R1", true).await;
        vote(ctx, proposal, "R2", true).await;
        ctx.chores
            .resolve_chore_proposal(HOUSE, proposal.id, proposal_end())
            .await
            .unwrap()
    }

    #[test]
    fn test_min_votes() {
        assert_eq!(proposal_min_votes(0.4, 4), 2);
        assert_eq!(proposal_min_votes(0.4, 5), 2);
        assert_eq!(proposal_min_votes(0.4, 6), 3);
        assert_eq!(proposal_min_votes(0.4, 2), 1);
        assert_eq!(proposal_min_votes(0.4, 0), 1);
    }

    #[tokio::test]
    async fn test_add_chore() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let description = "Rice & beans";
        let proposal = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cooking", json!({ "description": description }), t0())
            .await
            .unwrap();
        assert_eq!(proposal.kind(), ProposalKind::Add);

        let resolved = pass(&ctx, &proposal).await;
        assert!(resolved.valid);

        let chores = ctx.chores.get_chores(HOUSE).await.unwrap();
        assert_eq!(chores.len(), 1);
        assert_eq!(chores[0].metadata["description"], description);
    }

    #[tokio::test]
    async fn test_overwrite_existing_chore() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let first = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cooking", json!({ "description": "Rice & beans" }), t0())
            .await
            .unwrap();
        pass(&ctx, &first).await;

        let second = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cooking", json!({ "description": "With hot sauce" }), t0())
            .await
            .unwrap();
        pass(&ctx, &second).await;

        let chores = ctx.chores.get_chores(HOUSE).await.unwrap();
        assert_eq!(chores.len(), 1);
        assert_eq!(chores[0].name, "cooking");
        assert_eq!(chores[0].metadata["description"], "With hot sauce");
    }

    #[tokio::test]
    async fn test_delete_chore() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let add = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cleaning", json!({}), t0())
            .await
            .unwrap();
        pass(&ctx, &add).await;
        let cleaning = ctx.chores.get_chores(HOUSE).await.unwrap().remove(0);

        let delete = ctx
            .chores
            .create_delete_chore_proposal(HOUSE, "R1", cleaning.id, t0())
            .await
            .unwrap();
        assert_eq!(delete.kind(), ProposalKind::Delete);
        pass(&ctx, &delete).await;

        assert!(ctx.chores.get_chores(HOUSE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_chore() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let laundry = ctx.chores.add_chore(HOUSE, "laundry", json!({ "description": "Wash clothes" })).await.unwrap();

        let edit = ctx
            .chores
            .create_edit_chore_proposal(
                HOUSE,
                "R1",
                laundry.id,
                "laundry2",
                json!({ "description": "Wash and dry clothes" }),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(edit.kind(), ProposalKind::Edit);
        pass(&ctx, &edit).await;

        let chores = ctx.chores.get_chores(HOUSE).await.unwrap();
        assert_eq!(chores.len(), 1);
        assert_eq!(chores[0].id, laundry.id);
        assert_eq!(chores[0].name, "laundry2");
        assert_eq!(chores[0].metadata["description"], "Wash and dry clothes");
    }

    #[tokio::test]
    async fn test_edit_onto_taken_name_is_not_applied() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let laundry = ctx.chores.add_chore(HOUSE, "laundry", json!({})).await.unwrap();
        let edit = ctx
            .chores
            .create_edit_chore_proposal(HOUSE, "R1", laundry.id, "dishes", json!({}), t0())
            .await
            .unwrap();
        ctx.chores.add_chore(HOUSE, "dishes", json!({})).await.unwrap();

        let resolved = pass(&ctx, &edit).await;
        assert!(!resolved.valid);
        assert!(resolved.is_resolved());
        assert_eq!(ctx.chores.get_chore(HOUSE, laundry.id).await.unwrap().name, "laundry");
    }

    #[tokio::test]
    async fn test_cannot_resolve_before_close() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let proposal = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cooking", json!({}), t0())
            .await
            .unwrap();

        let err = ctx
            .chores
            .resolve_chore_proposal(HOUSE, proposal.id, t0() + Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChoresError::PollNotClosed(_)));
    }

    #[tokio::test]
    async fn test_cannot_resolve_twice() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        let proposal = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cooking", json!({}), t0())
            .await
            .unwrap();

        let resolved = ctx.chores.resolve_chore_proposal(HOUSE, proposal.id, proposal_end()).await.unwrap();
        assert!(!resolved.valid);

        let err = ctx
            .chores
            .resolve_chore_proposal(HOUSE, proposal.id, proposal_end())
            .await
            .unwrap_err();
        assert!(matches!(err, ChoresError::AlreadyResolved(_)));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[tokio::test]
    async fn test_insufficient_votes() {
        let ctx = setup(&["R1", "R2", "R3", "R4"], t0()).await;
        let proposal = ctx
            .chores
            .create_add_chore_proposal(HOUSE, "R1", "cooking", json!({}), t0())
            .await
            .unwrap();

        // 40% of 4 residents is 2 yes votes
        vote(&ctx, &proposal, "R1", true).await;
        vote(&ctx, &proposal, "R2", false).await;
        ctx.chores.resolve_chore_proposal(HOUSE, proposal.id, proposal_end()).await.unwrap();
        assert!(ctx.chores.get_chores(HOUSE).await.unwrap().is_empty());

        vote(&ctx, &proposal, "R3", true).await;
        let again = ctx.chores.resolve_chore_proposal(HOUSE, proposal.id, proposal_end()).await;
        assert!(matches!(again, Err(ChoresError::AlreadyResolved(_))));
    }

    #[tokio::test]
    async fn test_resolve_in_bulk() {
        let ctx = setup(&["R1", "R2"], t0()).await;
        for name in ["cooking", "laundry"] {
            let proposal = ctx
                .chores
                .create_add_chore_proposal(HOUSE, "R1", name, json!({}), t0())
                .await
                .unwrap();
            vote(&ctx, &proposal, "R1", true).await;
            vote(&ctx, &proposal, "R2", true).await;
        }

        let early = ctx
            .chores
            .resolve_chore_proposals(HOUSE, t0() + Duration::minutes(1))
            .await
            .unwrap();
        assert!(early.is_empty());
        assert!(ctx.chores.get_chores(HOUSE).await.unwrap().is_empty());

        let resolved = ctx.chores.resolve_chore_proposals(HOUSE, proposal_end()).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(ctx.chores.get_chores(HOUSE).await.unwrap().len(), 2);

        let again = ctx.chores.resolve_chore_proposals(HOUSE, proposal_end()).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(ctx.chores.get_chores(HOUSE).await.unwrap().len(), 2);
    }
}
