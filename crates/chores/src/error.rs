use thiserror::Error;

use mirror_admin::AdminError;
use mirror_core::StorageError;
use mirror_hearts::HeartsError;
use mirror_polls::PollError;

/// Error types for chore operations
#[derive(Error, Debug)]
pub enum ChoresError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Poll error: {0}")]
    PollError(#[from] PollError),

    #[error("Admin error: {0}")]
    AdminError(#[from] AdminError),

    #[error("Hearts error: {0}")]
    HeartsError(#[from] HeartsError),

    /// The request itself is unacceptable; retrying will not help
    #[error("{0}")]
    Validation(String),

    #[error("Poll {0} not closed")]
    PollNotClosed(u64),

    #[error("{0} already resolved")]
    AlreadyResolved(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Concurrent update of {0} did not settle")]
    Contention(String),
}

/// Result type for chore operations
pub type ChoresResult<T> = Result<T, ChoresError>;

/// Coarse classification of a [`ChoresError`] for user-facing handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, report to the user
    Validation,
    /// Wrong time: try later, or it is already done
    State,
    /// Unknown chore, claim, proposal, poll or resident
    NotFound,
    /// Storage or other infrastructure failure
    Internal,
}

impl ChoresError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChoresError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChoresError::Validation(_) => ErrorKind::Validation,
            ChoresError::PollNotClosed(_) | ChoresError::AlreadyResolved(_) => ErrorKind::State,
            ChoresError::NotFound(_) => ErrorKind::NotFound,
            ChoresError::PollError(PollError::PollNotFound(_)) => ErrorKind::NotFound,
            ChoresError::PollError(PollError::PollClosed(_)) => ErrorKind::State,
            ChoresError::PollError(PollError::InvalidPoll(_)) => ErrorKind::Validation,
            ChoresError::AdminError(AdminError::HouseNotFound(_))
            | ChoresError::AdminError(AdminError::ResidentNotFound(_)) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ChoresError::validation("zero value").kind(), ErrorKind::Validation);
        assert_eq!(ChoresError::PollNotClosed(1).kind(), ErrorKind::State);
        assert_eq!(ChoresError::AlreadyResolved("Proposal 1".into()).kind(), ErrorKind::State);
        assert_eq!(ChoresError::NotFound("Chore 9".into()).kind(), ErrorKind::NotFound);
        assert_eq!(ChoresError::from(PollError::PollNotFound(3)).kind(), ErrorKind::NotFound);
        assert_eq!(
            ChoresError::from(StorageError::Backend("disk".into())).kind(),
            ErrorKind::Internal
        );
    }
}
