use chrono::Duration;
use fileledger_storage::StorageError;
use thiserror::Error;

/// Contract manager errors
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
    #[error("Expiration {duration} from now is out of range")]
    ExpirationOutOfRange { duration: Duration },
}

pub type Result<T> = std::result::Result<T, ContractError>;
