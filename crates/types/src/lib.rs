//! Core data types for the fileledger append-only ledger.
//!
//! A [`Block`] wraps exactly one [`Transaction`] together with its chain
//! linkage and a proof-of-work nonce. Hashes are lowercase hex SHA-256 digests
//! over a canonical, key-sorted JSON preimage.

pub mod block;
pub mod time;
pub mod transaction;

pub use block::*;
pub use time::*;
pub use transaction::*;
