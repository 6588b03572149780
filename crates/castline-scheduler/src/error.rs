//! Pipeline error types.

use castline_db::DbError;
use std::time::Duration;
use thiserror::Error;

/// Failures of the claim-and-enqueue protocol that are not validation results.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The claim statement itself failed; nothing changed.
    #[error("claim failed: {0}")]
    Claim(#[source] DbError),

    /// The post was claimed but its fields could not be read. The claim is kept
    /// and the post is marked with `code`.
    #[error("{code}: {source}")]
    Load {
        code: &'static str,
        #[source]
        source: DbError,
    },

    /// The job row could not be written. The claim has been released.
    #[error("job insert failed: {0}")]
    Insert(#[source] DbError),
}

/// Failure of one sweep attempt.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("sweep timed out after {0:?}")]
    TimedOut(Duration),
}

impl SweepError {
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, SweepError::Db(e) if e.is_resource_exhausted())
    }
}
