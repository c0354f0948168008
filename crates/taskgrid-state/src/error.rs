//! Profile store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open profile database: {0}")]
    Open(String),

    /// A redb transaction, table, read or write failed.
    #[error("profile database error: {0}")]
    Storage(String),

    #[error("cannot encode profile: {0}")]
    Encode(String),

    #[error("cannot decode profile data: {0}")]
    Decode(String),

    #[error("profile snapshot file: {0}")]
    Snapshot(#[from] std::io::Error),
}
