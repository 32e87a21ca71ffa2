//! Registry of access contracts keyed by file content hash.

use crate::contract::AccessContract;
use crate::errors::Result;
use crate::types::{AccessAction, AccessDecision, ContractStats, DownloadAttempt};
use chrono::{DateTime, Duration, Utc};
use fileledger_storage::{load_or_fresh, SnapshotStore};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Persisted layout: file hash to contract.
pub type ContractsDocument = BTreeMap<String, AccessContract>;

pub type ContractStore = Arc<dyn SnapshotStore<ContractsDocument>>;

/// Owns every contract and writes the whole map through on each mutation.
///
/// Operations on an unknown file hash are a no-op reported as `false` or
/// `None`.
pub struct ContractManager {
    contracts: ContractsDocument,
    store: ContractStore,
    pending_flush: bool,
}

impl ContractManager {
    /// Restore contracts from `store`; an unreadable snapshot starts empty.
    pub fn open(store: ContractStore) -> Self {
        let contracts = load_or_fresh(store.as_ref()).unwrap_or_default();
        info!(contracts = contracts.len(), "Loaded contracts from {}", store.describe());
        Self {
            contracts,
            store,
            pending_flush: false,
        }
    }

    /// Create the contract for `file_hash`, owned by `owner`.
    ///
    /// Returns `None` and leaves the map untouched if the hash already has a
    /// contract: ownership of identical content stays with the first uploader.
    pub fn create_contract(
        &mut self,
        file_hash: impl Into<String>,
        owner: impl Into<String>,
    ) -> Option<AccessContract> {
        let file_hash = file_hash.into();
        if self.contracts.contains_key(&file_hash) {
            debug!(file_hash = %file_hash, "Contract already exists, keeping it");
            return None;
        }
        let contract = AccessContract::new(file_hash.clone(), owner);
        info!(
            contract_id = %contract.contract_id,
            owner = %contract.owner,
            "Created access contract"
        );
        self.contracts.insert(file_hash, contract.clone());
        self.persist();
        Some(contract)
    }

    pub fn get(&self, file_hash: &str) -> Option<&AccessContract> {
        self.contracts.get(file_hash)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &AccessContract> {
        self.contracts.values()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn set_public_access(&mut self, file_hash: &str, is_public: bool) -> bool {
        self.update(file_hash, |contract| contract.set_public_access(is_public))
            .is_some()
    }

    pub fn set_max_downloads(&mut self, file_hash: &str, max: Option<NonZeroU32>) -> bool {
        self.update(file_hash, |contract| contract.set_max_downloads(max))
            .is_some()
    }

    pub fn clear_max_downloads(&mut self, file_hash: &str) -> bool {
        self.set_max_downloads(file_hash, None)
    }

    pub fn set_expiration(&mut self, file_hash: &str, duration: Duration) -> Result<bool> {
        let updated = self.try_update(file_hash, |contract| contract.set_expiration(duration))?;
        Ok(updated.is_some())
    }

    pub fn set_expiration_at(&mut self, file_hash: &str, at: Option<DateTime<Utc>>) -> bool {
        self.update(file_hash, |contract| contract.set_expiration_at(at))
            .is_some()
    }

    pub fn grant_permission(
        &mut self,
        file_hash: &str,
        user: &str,
        duration: Option<Duration>,
        max_downloads: Option<NonZeroU32>,
    ) -> Result<bool> {
        let granted = self.try_update(file_hash, |contract| {
            contract.grant_permission(user, duration, max_downloads)
        })?;
        Ok(granted.is_some())
    }

    /// False when the contract or the grant does not exist.
    pub fn revoke_permission(&mut self, file_hash: &str, user: &str) -> bool {
        let revoked = self
            .contracts
            .get_mut(file_hash)
            .is_some_and(|contract| contract.revoke_permission(user));
        if revoked {
            self.persist();
        }
        revoked
    }

    pub fn check_access(&self, file_hash: &str, user: &str) -> Option<AccessDecision> {
        self.contracts
            .get(file_hash)
            .map(|contract| contract.check_access(user))
    }

    pub fn log_access(
        &mut self,
        file_hash: &str,
        user: &str,
        action: impl Into<AccessAction>,
        success: bool,
        reason: &str,
    ) -> bool {
        let action = action.into();
        self.update(file_hash, |contract| {
            contract.log_access(user, action, success, reason)
        })
        .is_some()
    }

    /// Decide a download by `user` and log the attempt.
    ///
    /// A denial is logged at once. An allowed download first runs `record`
    /// and is logged as a success only when that returns `Ok`, so usage never
    /// counts a download that was not recorded. On error the contract is left
    /// untouched. `None` when the file has no contract.
    pub fn authorize_download<T, E>(
        &mut self,
        file_hash: &str,
        user: &str,
        record: impl FnOnce(&AccessDecision) -> std::result::Result<T, E>,
    ) -> Option<std::result::Result<DownloadAttempt<T>, E>> {
        let contract = self.contracts.get_mut(file_hash)?;
        let decision = contract.check_access(user);
        debug!(
            file_hash,
            user,
            allowed = decision.allowed,
            reason = %decision.reason,
            "Download access decided"
        );

        let attempt = if decision.allowed {
            let recorded = match record(&decision) {
                Ok(recorded) => recorded,
                Err(err) => return Some(Err(err)),
            };
            contract.log_access(user, AccessAction::Download, true, decision.reason.as_str());
            DownloadAttempt::Granted(decision, recorded)
        } else {
            contract.log_access(user, AccessAction::Download, false, decision.reason.as_str());
            DownloadAttempt::Denied(decision)
        };
        self.persist();
        Some(Ok(attempt))
    }

    pub fn stats(&self, file_hash: &str) -> Option<ContractStats> {
        self.contracts.get(file_hash).map(AccessContract::stats)
    }

    /// True when the in-memory contracts have not reached the store.
    pub fn pending_flush(&self) -> bool {
        self.pending_flush
    }

    /// Retry persistence, surfacing the error this time.
    pub fn flush(&mut self) -> Result<()> {
        self.store.save(&self.contracts)?;
        self.pending_flush = false;
        Ok(())
    }

    fn update<R>(
        &mut self,
        file_hash: &str,
        apply: impl FnOnce(&mut AccessContract) -> R,
    ) -> Option<R> {
        let contract = self.contracts.get_mut(file_hash)?;
        let out = apply(contract);
        self.persist();
        Some(out)
    }

    fn try_update<R>(
        &mut self,
        file_hash: &str,
        apply: impl FnOnce(&mut AccessContract) -> Result<R>,
    ) -> Result<Option<R>> {
        let Some(contract) = self.contracts.get_mut(file_hash) else {
            return Ok(None);
        };
        let out = apply(contract)?;
        self.persist();
        Ok(Some(out))
    }

    fn persist(&mut self) {
        match self.store.save(&self.contracts) {
            Ok(()) => self.pending_flush = false,
            Err(err) => {
                error!(
                    store = %self.store.describe(),
                    error = %err,
                    "Failed to persist contracts, continuing in memory"
                );
                self.pending_flush = true;
            }
        }
    }
}
