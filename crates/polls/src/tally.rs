//! Vote tallying

use serde::{Deserialize, Serialize};

use crate::{Poll, PollVote};

/// Yes/no counts of a poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTally {
    /// Number of yes votes
    pub yays: u32,
    /// Number of no votes
    pub nays: u32,
}

impl PollTally {
    /// Count the ballots submitted inside the poll's window. Abstentions and
    /// ballots outside the window are ignored.
    pub fn count(poll: &Poll, votes: &[PollVote]) -> Self {
        votes
            .iter()
            .filter(|v| v.poll_id == poll.id && poll.counts_at(v.submitted_at))
            .fold(Self::default(), |mut tally, v| {
                match v.vote {
                    Some(true) => tally.yays += 1,
                    Some(false) => tally.nays += 1,
                    None => {}
                }
                tally
            })
    }

    /// At least `min_votes` yes votes and strictly more yes than no
    pub fn passes(&self, min_votes: u32) -> bool {
        self.yays >= min_votes && self.yays > self.nays
    }
}
