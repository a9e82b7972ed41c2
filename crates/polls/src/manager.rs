//! Poll manager
//!
//! Creates polls, records ballots and produces tallies.

use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use mirror_core::crypto::anonymize;
use mirror_core::storage::{pad_id, JsonStorage, Storage};

use crate::{Poll, PollError, PollResult, PollTally, PollVote};

/// Path constants for storage
const POLLS_PATH: &str = "polls/poll";
const VOTES_PATH: &str = "polls/votes";
const POLL_SEQUENCE: &str = "polls";

/// Stores polls and their ballots
pub struct PollManager {
    /// Storage for poll data
    storage: Arc<dyn Storage>,
    /// Secret mixed into voter hashes
    vote_salt: String,
}

impl PollManager {
    /// Create a new poll manager
    pub fn new(storage: Arc<dyn Storage>, vote_salt: impl Into<String>) -> Self {
        Self {
            storage,
            vote_salt: vote_salt.into(),
        }
    }

    fn poll_key(poll_id: u64) -> String {
        format!("{}/{}", POLLS_PATH, pad_id(poll_id))
    }

    fn votes_prefix(poll_id: u64) -> String {
        format!("{}/{}/", VOTES_PATH, pad_id(poll_id))
    }

    /// Anonymized id a resident votes under
    pub fn voter_hash(&self, resident_id: &str) -> String {
        anonymize(&self.vote_salt, resident_id).to_hex()
    }

    /// Open a poll running from `start_time` for `duration`
    pub async fn create_poll(
        &self,
        house_id: &str,
        start_time: DateTime<Utc>,
        duration: Duration,
        min_votes: u32,
    ) -> PollResult<Poll> {
        if duration <= Duration::zero() {
            return Err(PollError::InvalidPoll("poll duration must be positive".to_string()));
        }

        let id = self.storage.next_id(POLL_SEQUENCE).await?;
        let poll = Poll {
            id,
            house_id: house_id.to_string(),
            start_time,
            end_time: start_time + duration,
            min_votes,
        };
        self.storage.put_json(&Self::poll_key(id), &poll).await?;

        debug!("Created poll {} for house {} closing at {}", id, house_id, poll.end_time);
        Ok(poll)
    }

    /// Look up a poll
    pub async fn get_poll(&self, poll_id: u64) -> PollResult<Poll> {
        self.storage
            .get_json_opt(&Self::poll_key(poll_id))
            .await?
            .ok_or(PollError::PollNotFound(poll_id))
    }

    /// Record a resident's ballot, replacing any earlier ballot on the same poll
    pub async fn submit_vote(
        &self,
        poll_id: u64,
        resident_id: &str,
        submitted_at: DateTime<Utc>,
        vote: Option<bool>,
    ) -> PollResult<PollVote> {
        let poll = self.get_poll(poll_id).await?;
        if poll.end_time < submitted_at {
            return Err(PollError::PollClosed(poll_id));
        }

        let voter_hash = self.voter_hash(resident_id);
        let ballot = PollVote {
            poll_id,
            voter_hash: voter_hash.clone(),
            submitted_at,
            vote,
        };
        let key = format!("{}{}", Self::votes_prefix(poll_id), voter_hash);
        self.storage.put_json(&key, &ballot).await?;

        info!("Vote recorded on poll {}", poll_id);
        Ok(ballot)
    }

    /// Every ballot on a poll
    pub async fn get_poll_votes(&self, poll_id: u64) -> PollResult<Vec<PollVote>> {
        Ok(self.storage.scan_json(&Self::votes_prefix(poll_id)).await?)
    }

    /// Ballots submitted inside the poll's window
    pub async fn get_poll_results(&self, poll_id: u64) -> PollResult<Vec<PollVote>> {
        let poll = self.get_poll(poll_id).await?;
        let votes = self.get_poll_votes(poll_id).await?;
        Ok(votes
            .into_iter()
            .filter(|v| poll.counts_at(v.submitted_at))
            .collect())
    }

    /// Yes/no counts of a poll
    pub async fn get_poll_result_counts(&self, poll_id: u64) -> PollResult<PollTally> {
        let poll = self.get_poll(poll_id).await?;
        let votes = self.get_poll_votes(poll_id).await?;
        Ok(PollTally::count(&poll, &votes))
    }

    /// Whether the poll has closed at `now`
    pub async fn is_closed(&self, poll_id: u64, now: DateTime<Utc>) -> PollResult<bool> {
        Ok(self.get_poll(poll_id).await?.is_closed(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mirror_core::storage::{MemoryStorage, SledStorage};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn manager() -> PollManager {
        PollManager::new(Arc::new(MemoryStorage::new()), "salt")
    }

    #[tokio::test]
    async fn test_create_and_get_poll() {
        let polls = manager();
        let poll = polls.create_poll("H1", start(), Duration::hours(48), 2).await.unwrap();

        assert_eq!(poll.end_time, start() + Duration::hours(48));
        assert_eq!(polls.get_poll(poll.id).await.unwrap(), poll);
        assert!(matches!(polls.get_poll(999).await, Err(PollError::PollNotFound(999))));
        assert!(polls.create_poll("H1", start(), Duration::zero(), 2).await.is_err());
    }

    #[tokio::test]
    async fn test_votes_are_upserted_per_resident() {
        let polls = manager();
        let poll = polls.create_poll("H1", start(), Duration::hours(48), 2).await.unwrap();

        polls.submit_vote(poll.id, "R1", start(), Some(true)).await.unwrap();
        polls.submit_vote(poll.id, "R2", start(), Some(true)).await.unwrap();
        polls.submit_vote(poll.id, "R1", start() + Duration::hours(1), Some(false)).await.unwrap();

        let votes = polls.get_poll_votes(poll.id).await.unwrap();
        assert_eq!(votes.len(), 2);
        assert!(votes.iter().all(|v| v.voter_hash != "R1" && v.voter_hash != "R2"));

        let tally = polls.get_poll_result_counts(poll.id).await.unwrap();
        assert_eq!(tally, PollTally { yays: 1, nays: 1 });
    }

    #[tokio::test]
    async fn test_vote_after_close_is_rejected() {
        let polls = manager();
        let poll = polls.create_poll("H1", start(), Duration::hours(48), 2).await.unwrap();

        // Exactly at the end time is still accepted
        polls.submit_vote(poll.id, "R1", poll.end_time, Some(true)).await.unwrap();

        let late = polls
            .submit_vote(poll.id, "R2", poll.end_time + Duration::seconds(1), Some(true))
            .await;
        assert!(matches!(late, Err(PollError::PollClosed(_))));

        assert!(!polls.is_closed(poll.id, poll.end_time - Duration::seconds(1)).await.unwrap());
        assert!(polls.is_closed(poll.id, poll.end_time).await.unwrap());
    }

    #[tokio::test]
    async fn test_early_votes_are_not_counted() {
        let polls = manager();
        let poll = polls.create_poll("H1", start(), Duration::hours(48), 2).await.unwrap();

        polls.submit_vote(poll.id, "R1", start() - Duration::hours(1), Some(true)).await.unwrap();
        polls.submit_vote(poll.id, "R2", start(), Some(true)).await.unwrap();

        assert_eq!(polls.get_poll_votes(poll.id).await.unwrap().len(), 2);
        assert_eq!(polls.get_poll_results(poll.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_salt_changes_voter_hash() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let a = PollManager::new(storage.clone(), "one");
        let b = PollManager::new(storage, "two");
        assert_ne!(a.voter_hash("R1"), b.voter_hash("R1"));
        assert_eq!(a.voter_hash("R1"), a.voter_hash("R1"));
    }

    #[tokio::test]
    async fn test_polls_persist_in_sled() {
        let dir = tempfile::tempdir().unwrap();
        let poll_id = {
            let polls = PollManager::new(Arc::new(SledStorage::open(dir.path()).unwrap()), "salt");
            let poll = polls.create_poll("H1", start(), Duration::hours(1), 2).await.unwrap();
            polls.submit_vote(poll.id, "R1", start(), Some(true)).await.unwrap();
            poll.id
        };

        let polls = PollManager::new(Arc::new(SledStorage::open(dir.path()).unwrap()), "salt");
        let tally = polls.get_poll_result_counts(poll_id).await.unwrap();
        assert_eq!(tally.yays, 1);
    }
}
