use fileledger_contracts::ContractError;
use fileledger_ledger::LedgerError;
use fileledger_verification::VerificationError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coordinator errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Data directory {} is locked by {holder}: {source}", .dir.display())]
    Locked {
        dir: PathBuf,
        holder: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("Sealing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
