//! fileledger Verification
//!
//! Peers vote on whether a stored file is authentic. Each vote is weighted by
//! the voter's reputation at the time it was cast, and reputation in turn grows
//! with the number of votes a user has cast, capped at [`MAX_REPUTATION`].

pub mod errors;
pub mod registry;
pub mod types;

pub use errors::*;
pub use registry::{VerificationDocument, VerificationRegistry, VerificationStore};
pub use types::*;
