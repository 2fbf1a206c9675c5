use thiserror::Error;

use quorum_types::models::InvalidVoteType;

/// Failures surfaced to route handlers. Every variant means the operation
/// was rejected and nothing was written.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced entity is absent.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Actor is not the author or recipient the operation requires.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidVoteType(#[from] InvalidVoteType),

    /// The store refused a write that would break the accepted-answer
    /// invariant; the caller may retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
