use crate::errors::{ContractError, Result};
use crate::types::{
    AccessAction, AccessDecision, AccessLogEntry, AccessReason, ContractState, ContractStats,
    Permission,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;

/// Prefix of every contract identifier.
pub const CONTRACT_ID_PREFIX: &str = "contract_";

/// Number of file-hash characters kept in a contract identifier.
pub const CONTRACT_ID_HASH_CHARS: usize = 16;

/// Derive the contract identifier for a file content hash.
pub fn contract_id_for(file_hash: &str) -> String {
    let short: String = file_hash.chars().take(CONTRACT_ID_HASH_CHARS).collect();
    format!("{CONTRACT_ID_PREFIX}{short}")
}

/// Latest calendar year an expiration may fall in.
pub const MAX_EXPIRATION_YEAR: i32 = 9999;

/// The instant `duration` after `now`.
///
/// Fails when the result overflows or falls outside years 1 to
/// [`MAX_EXPIRATION_YEAR`], which stored timestamps cannot carry.
pub fn expiration_after(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(duration)
        .filter(|at| (1..=MAX_EXPIRATION_YEAR).contains(&at.year()))
        .ok_or(ContractError::ExpirationOutOfRange { duration })
}

/// Access policy attached to one stored file.
///
/// The owner is fixed at creation. The access log only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContract {
    pub contract_id: String,
    pub file_hash: String,
    pub owner: String,
    pub creation_time: DateTime<Utc>,
    pub is_public: bool,
    /// Cap on successful non-owner downloads while public.
    #[serde(default, deserialize_with = "crate::types::download_cap::deserialize")]
    pub max_downloads: Option<NonZeroU32>,
    pub expiration: Option<DateTime<Utc>>,
    pub permissions: BTreeMap<String, Permission>,
    pub access_log: Vec<AccessLogEntry>,
}

impl AccessContract {
    /// A private contract with no grants, created now.
    pub fn new(file_hash: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new_at(file_hash, owner, Utc::now())
    }

    pub fn new_at(
        file_hash: impl Into<String>,
        owner: impl Into<String>,
        creation_time: DateTime<Utc>,
    ) -> Self {
        let file_hash = file_hash.into();
        Self {
            contract_id: contract_id_for(&file_hash),
            file_hash,
            owner: owner.into(),
            creation_time,
            is_public: false,
            max_downloads: None,
            expiration: None,
            permissions: BTreeMap::new(),
            access_log: Vec::new(),
        }
    }

    pub fn set_public_access(&mut self, is_public: bool) {
        self.is_public = is_public;
    }

    pub fn set_max_downloads(&mut self, max_downloads: Option<NonZeroU32>) {
        self.max_downloads = max_downloads;
    }

    pub fn clear_max_downloads(&mut self) {
        self.max_downloads = None;
    }

    /// Expire the whole contract `duration` from now.
    pub fn set_expiration(&mut self, duration: Duration) -> Result<()> {
        self.expiration = Some(expiration_after(Utc::now(), duration)?);
        Ok(())
    }

    pub fn set_expiration_at(&mut self, expiration: Option<DateTime<Utc>>) {
        self.expiration = expiration;
    }

    /// Grant `user` access, replacing any earlier grant and resetting its usage.
    pub fn grant_permission(
        &mut self,
        user: impl Into<String>,
        duration: Option<Duration>,
        max_downloads: Option<NonZeroU32>,
    ) -> Result<()> {
        self.grant_permission_at(user, duration, max_downloads, Utc::now())
    }

    pub fn grant_permission_at(
        &mut self,
        user: impl Into<String>,
        duration: Option<Duration>,
        max_downloads: Option<NonZeroU32>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let expiration = duration
            .map(|duration| expiration_after(now, duration))
            .transpose()?;
        let permission = Permission {
            granted_by: self.owner.clone(),
            granted_at: now,
            max_downloads,
            downloads_used: 0,
            expiration,
        };
        self.permissions.insert(user.into(), permission);
        Ok(())
    }

    /// Remove the grant for `user`. Returns whether one existed.
    pub fn revoke_permission(&mut self, user: &str) -> bool {
        self.permissions.remove(user).is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| now > expiration)
    }

    pub fn check_access(&self, user: &str) -> AccessDecision {
        self.check_access_at(user, Utc::now())
    }

    /// Decide whether `user` may access the file at `now`.
    ///
    /// Rules are tried in order and the first match wins: contract expiry,
    /// ownership, public access (with its download cap), then the user's own
    /// grant.
    pub fn check_access_at(&self, user: &str, now: DateTime<Utc>) -> AccessDecision {
        if self.is_expired_at(now) {
            return AccessDecision::deny(AccessReason::ContractExpired);
        }
        if user == self.owner {
            return AccessDecision::allow(AccessReason::OwnerAccess);
        }
        if self.is_public {
            if let Some(max) = self.max_downloads {
                if self.public_downloads() >= max.get() as usize {
                    return AccessDecision::deny(AccessReason::DownloadLimitReached);
                }
            }
            return AccessDecision::allow(AccessReason::PublicAccess);
        }

        let Some(permission) = self.permissions.get(user) else {
            return AccessDecision::deny(AccessReason::NoPermissionGranted);
        };
        if permission.is_expired_at(now) {
            return AccessDecision::deny(AccessReason::PermissionExpired);
        }
        if permission.is_exhausted() {
            return AccessDecision::deny(AccessReason::UserDownloadLimitReached);
        }
        AccessDecision::allow(AccessReason::UserPermission)
    }

    pub fn log_access(
        &mut self,
        user: impl Into<String>,
        action: impl Into<AccessAction>,
        success: bool,
        reason: impl Into<String>,
    ) {
        self.log_access_at(user, action, success, reason, Utc::now());
    }

    /// Append an audit entry. A successful download by a user holding a grant
    /// also counts against that grant.
    pub fn log_access_at(
        &mut self,
        user: impl Into<String>,
        action: impl Into<AccessAction>,
        success: bool,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let entry = AccessLogEntry {
            timestamp: now,
            user: user.into(),
            action: action.into(),
            success,
            reason: reason.into(),
        };

        if success && entry.action == AccessAction::Download {
            if let Some(permission) = self.permissions.get_mut(&entry.user) {
                permission.downloads_used = permission.downloads_used.saturating_add(1);
            }
        }
        self.access_log.push(entry);
    }

    /// Successful downloads by anyone other than the owner.
    pub fn public_downloads(&self) -> usize {
        self.access_log
            .iter()
            .filter(|entry| {
                entry.success && entry.action == AccessAction::Download && entry.user != self.owner
            })
            .count()
    }

    pub fn state(&self) -> ContractState {
        self.state_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> ContractState {
        if self.is_expired_at(now) {
            ContractState::Expired
        } else if self.is_public && self.max_downloads.is_some() {
            ContractState::PublicCapped
        } else if self.is_public {
            ContractState::UnrestrictedPublic
        } else if self.permissions.is_empty() {
            ContractState::PrivateNoGrants
        } else {
            ContractState::PrivateGranted
        }
    }

    pub fn stats(&self) -> ContractStats {
        let successful_downloads = self
            .access_log
            .iter()
            .filter(|entry| entry.success && entry.action == AccessAction::Download)
            .count();
        let failed_accesses = self.access_log.iter().filter(|entry| !entry.success).count();

        ContractStats {
            contract_id: self.contract_id.clone(),
            file_hash: self.file_hash.clone(),
            owner: self.owner.clone(),
            is_public: self.is_public,
            total_permissions: self.permissions.len(),
            total_accesses: self.access_log.len(),
            successful_downloads,
            failed_accesses,
            creation_time: self.creation_time,
            expiration: self.expiration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: u32) -> Option<NonZeroU32> {
        NonZeroU32::new(n)
    }

    fn download(contract: &mut AccessContract, user: &str, now: DateTime<Utc>) -> AccessDecision {
        let decision = contract.check_access_at(user, now);
        let reason = decision.reason.as_str();
        contract.log_access_at(user, AccessAction::Download, decision.allowed, reason, now);
        decision
    }

    #[test]
    fn test_contract_id_uses_hash_prefix() {
        let contract = AccessContract::new("0123456789abcdef0123", "alice");
        assert_eq!(contract.contract_id, "contract_0123456789abcdef");
        assert_eq!(contract_id_for("abc"), "contract_abc");
    }

    #[test]
    fn test_new_contract_is_private_without_grants() {
        let now = Utc::now();
        let contract = AccessContract::new_at("h1", "alice", now);
        assert_eq!(contract.state_at(now), ContractState::PrivateNoGrants);
        assert_eq!(
            contract.check_access_at("bob", now),
            AccessDecision::deny(AccessReason::NoPermissionGranted)
        );
        assert_eq!(
            contract.check_access_at("alice", now),
            AccessDecision::allow(AccessReason::OwnerAccess)
        );
    }

    #[test]
    fn test_expired_contract_denies_owner() {
        let now = Utc::now();
        let mut contract = AccessContract::new_at("h1", "alice", now);
        contract.set_public_access(true);
        contract.set_expiration_at(Some(now + Duration::hours(1)));

        assert!(contract.check_access_at("alice", now).allowed);
        let later = now + Duration::hours(2);
        assert_eq!(
            contract.check_access_at("alice", later),
            AccessDecision::deny(AccessReason::ContractExpired)
        );
        assert_eq!(contract.state_at(later), ContractState::Expired);
    }

    #[test]
    fn test_public_cap_counts_only_successful_non_owner_downloads() {
        let now = Utc::now();
        let mut contract = AccessContract::new_at("h1", "alice", now);
        contract.set_public_access(true);
        contract.set_max_downloads(cap(2));
        assert_eq!(contract.state_at(now), ContractState::PublicCapped);

        // Owner downloads and views never count.
        download(&mut contract, "alice", now);
        contract.log_access_at("carol", "view", true, "Public access", now);

        assert!(download(&mut contract, "bob", now).allowed);
        assert!(download(&mut contract, "carol", now).allowed);
        assert_eq!(
            download(&mut contract, "dave", now),
            AccessDecision::deny(AccessReason::DownloadLimitReached)
        );
        assert!(contract.check_access_at("alice", now).allowed);
        assert_eq!(contract.public_downloads(), 2);
    }

    #[test]
    fn test_user_grant_limit_and_expiry() {
        let now = Utc::now();
        let mut contract = AccessContract::new_at("h1", "alice", now);
        contract
            .grant_permission_at("bob", Some(Duration::hours(1)), cap(1), now)
            .unwrap();
        assert_eq!(contract.state_at(now), ContractState::PrivateGranted);

        assert_eq!(
            download(&mut contract, "bob", now),
            AccessDecision::allow(AccessReason::UserPermission)
        );
        assert_eq!(contract.permissions["bob"].downloads_used, 1);
        assert_eq!(
            download(&mut contract, "bob", now),
            AccessDecision::deny(AccessReason::UserDownloadLimitReached)
        );
        // A denied download leaves usage alone.
        assert_eq!(contract.permissions["bob"].downloads_used, 1);

        contract
            .grant_permission_at("bob", Some(Duration::hours(1)), cap(1), now)
            .unwrap();
        assert_eq!(contract.permissions["bob"].downloads_used, 0);
        assert_eq!(
            contract.check_access_at("bob", now + Duration::hours(2)),
            AccessDecision::deny(AccessReason::PermissionExpired)
        );
    }

    #[test]
    fn test_revoke_and_stats() {
        let now = Utc::now();
        let mut contract = AccessContract::new_at("h1", "alice", now);
        contract.grant_permission_at("bob", None, None, now).unwrap();
        download(&mut contract, "bob", now);
        download(&mut contract, "eve", now);

        assert!(contract.revoke_permission("bob"));
        assert!(!contract.revoke_permission("bob"));
        assert_eq!(
            contract.check_access_at("bob", now),
            AccessDecision::deny(AccessReason::NoPermissionGranted)
        );

        let stats = contract.stats();
        assert_eq!(stats.total_permissions, 0);
        assert_eq!(stats.total_accesses, 2);
        assert_eq!(stats.successful_downloads, 1);
        assert_eq!(stats.failed_accesses, 1);
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let now = Utc::now();
        let mut contract = AccessContract::new_at("h1", "alice", now);
        let huge = Duration::try_hours(3_000_000_000).unwrap();

        assert!(matches!(
            contract.grant_permission_at("bob", Some(huge), None, now),
            Err(ContractError::ExpirationOutOfRange { .. })
        ));
        assert!(contract.permissions.is_empty());
        assert!(contract.set_expiration(huge).is_err());
        assert!(contract.set_expiration(-huge).is_err());
        assert_eq!(contract.expiration, None);

        // Past year 9999 is refused even when chrono could represent it.
        let beyond = Duration::try_days(366 * 9000).unwrap();
        assert!(expiration_after(now, beyond).is_err());
        let decade = Duration::try_days(3650).unwrap();
        assert_eq!(expiration_after(now, decade).unwrap(), now + decade);
    }

    #[test]
    fn test_zero_cap_reads_back_as_uncapped() {
        let mut contract = AccessContract::new("h1", "alice");
        contract.grant_permission("bob", None, cap(2)).unwrap();
        let mut value = serde_json::to_value(&contract).unwrap();
        value["max_downloads"] = 0.into();
        value["permissions"]["bob"]["max_downloads"] = 0.into();

        let restored: AccessContract = serde_json::from_value(value).unwrap();
        assert_eq!(restored.max_downloads, None);
        assert_eq!(restored.permissions["bob"].max_downloads, None);
    }

    #[test]
    fn test_reason_serializes_as_text() {
        let json = serde_json::to_string(&AccessDecision::deny(AccessReason::PermissionExpired))
            .unwrap();
        assert_eq!(json, r#"{"allowed":false,"reason":"Permission expired"}"#);
        let action: AccessAction = serde_json::from_str(r#""share""#).unwrap();
        assert_eq!(action, AccessAction::Other("share".into()));
    }
}
