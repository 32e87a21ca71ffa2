//! fileledger Core
//!
//! Ties the ledger, the access contracts and the peer verification registry
//! together behind one [`FileLedger`] handle, with configuration loading and
//! an exclusive data directory lock.

pub mod config;
pub mod errors;
pub mod lock;
pub mod service;

pub use self::config::{FileLedgerConfig, LogFormat, ENV_PREFIX};
pub use errors::*;
pub use lock::{DataDirLock, LockOwner, LOCK_FILE_NAME};
pub use service::{
    AccessPolicy, DownloadOutcome, FileDetails, FileLedger, FileListing, SystemStats,
    UploadReceipt, UploadRequest,
};

pub use fileledger_contracts as contracts;
pub use fileledger_ledger as ledger;
pub use fileledger_types as types;
pub use fileledger_verification as verification;
