use ulid::Ulid;

use crate::lifecycle::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    /// Malformed or out-of-policy input, rejected before any write.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Lost a race for the slot. Expected under load; callers should re-query.
    #[error("slot no longer available")]
    SlotUnavailable { conflicting: Ulid },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}
