//! Error types for the ledger

use fileledger_storage::StorageError;
use fileledger_types::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("Invalid difficulty {difficulty}: must be at most {max}")]
    InvalidDifficulty { difficulty: u32, max: u32 },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),
}

/// First inconsistency found while walking the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    #[error("chain is empty")]
    EmptyChain,

    #[error("block 0 is not a genesis block with previous hash \"0\"")]
    MalformedGenesis,

    #[error("block at position {position} carries index {index}")]
    IndexMismatch { position: usize, index: u64 },

    #[error("block {index} hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("block {index} hash does not meet difficulty {difficulty}")]
    InsufficientWork { index: u64, difficulty: u32 },

    #[error("block {index} previous hash does not match block {previous}")]
    BrokenLink { index: u64, previous: u64 },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
