//! fileledger Contracts
//!
//! Per-file access contracts: public or private access, download caps,
//! time-limited per-user grants, contract expiry and an append-only access
//! log. Contracts are owned by a [`ContractManager`] that persists the whole
//! map after every change.

pub mod contract;
pub mod errors;
pub mod manager;
pub mod types;

pub use contract::{
    contract_id_for, expiration_after, AccessContract, CONTRACT_ID_PREFIX, MAX_EXPIRATION_YEAR,
};
pub use errors::*;
pub use manager::{ContractManager, ContractStore, ContractsDocument};
pub use types::*;
