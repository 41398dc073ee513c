//! Error taxonomy for the arena core.

use thiserror::Error;

/// Errors surfaced by the arena core.
///
/// Variants carry rendered messages so the error stays `Clone`; the TTL cache
/// hands one producer failure to every waiter of that call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArenaError {
    /// Bad caller input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store unreachable or write failed. Retried on the next tick or action.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Price or market lookup failed. Treated as an unknown outcome.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// Unknown user, token or record.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ArenaError {
    /// Whether the operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArenaError::Persistence(_) | ArenaError::TransientFetch(_))
    }
}

impl From<sqlx::Error> for ArenaError {
    fn from(err: sqlx::Error) -> Self {
        ArenaError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for ArenaError {
    fn from(err: reqwest::Error) -> Self {
        ArenaError::TransientFetch(err.to_string())
    }
}

pub type Result<T, E = ArenaError> = std::result::Result<T, E>;
