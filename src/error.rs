//! The crate-wide error taxonomy, matching the categories in the edit
//! pipeline's error handling design: failures are either fatal to a
//! session (auth, initial lookup) or recoverable and reported back to the
//! sender without tearing down the connection.

use thiserror::Error;

/// Errors raised while running a transactional edit against the
/// [`crate::store::DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    /// Reserved for a future optimistic-concurrency path; the current
    /// locking strategy never produces this today.
    #[error("conflicting concurrent write to document {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] anyhow::Error),
}

/// Errors surfaced while handling one inbound client frame.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("auth failure: {0}")]
    AuthFailure(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid message format: {0}")]
    MalformedMessage(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Conflict(id) => Self::StorageFailure(format!("conflict on {id}")),
            StoreError::StorageFailure(e) => Self::StorageFailure(e.to_string()),
        }
    }
}
