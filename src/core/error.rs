use crate::models::TaskState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("the requested resource could not be found")]
    ResourceNotFound,

    #[error("the requested resource already exists")]
    ResourceExists,

    #[error("cannot claim actual LRP")]
    ActualLrpCannotBeClaimed,

    #[error("cannot start actual LRP")]
    ActualLrpCannotBeStarted,

    #[error("cannot unclaim actual LRP")]
    ActualLrpCannotBeUnclaimed,

    #[error("cannot crash actual LRP")]
    ActualLrpCannotBeCrashed,

    #[error("cannot fail actual LRP")]
    ActualLrpCannotBeFailed,

    #[error("cannot remove actual LRP")]
    ActualLrpCannotBeRemoved,

    #[error("cannot transition task from {from} to {to}")]
    InvalidStateTransition { from: TaskState, to: TaskState },

    #[error("task is running on cell '{expected}', not '{got}'")]
    RunningOnDifferentCell { expected: String, got: String },

    #[error("deserialize error: {0}")]
    Deserialize(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("guid generation failed: {0}")]
    GuidGeneration(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("deadlock: {0}")]
    Deadlock(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl DbError {
    /// Only lock contention is safe to retry blindly; every other error
    /// reflects the stored state and will keep failing.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DbError::Deadlock(_))
    }

    /// Payload corruption, as opposed to a missing or conflicting record.
    pub fn is_corruption(&self) -> bool {
        matches!(self, DbError::Deserialize(_) | DbError::InvalidRecord(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Unknown(err.to_string())
    }
}
