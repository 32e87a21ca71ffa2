//! fileledger Ledger
//!
//! Append-only, hash-linked record of file uploads and downloads. Each block is
//! sealed by a proof-of-work search before it is appended, the whole chain is
//! rewritten to its snapshot store after every append, and every read-side
//! view (file index, version history, stats, analytics, search) is a fold over
//! the block sequence.

pub mod chain;
pub mod errors;
pub mod views;

pub use chain::{Ledger, LedgerDocument, LedgerStore};
pub use errors::*;
pub use views::{
    Analytics, ChainStats, FileQuery, FileRecord, VersionEntry, VersionPlan, DEFAULT_TOP_N,
};
