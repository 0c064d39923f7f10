// Fingerprint matching pipeline:
// candidate selection by duration -> per-slot Hamming distances -> averaging and ranking.

pub mod cancel;
pub mod candidate;
pub mod distance;
pub mod matcher;
pub mod ranker;

use crate::database::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Operation cancelled")]
    Cancelled,
}
