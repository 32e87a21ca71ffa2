use fileledger_storage::StorageError;
use thiserror::Error;

/// Verification errors
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Invalid vote: {0}")]
    InvalidVote(String),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, VerificationError>;
