//! Types for access contracts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

/// Why an access check came out the way it did.
///
/// Serialized as the human-readable reason text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessReason {
    #[serde(rename = "Contract expired")]
    ContractExpired,
    #[serde(rename = "Owner access")]
    OwnerAccess,
    #[serde(rename = "Download limit reached")]
    DownloadLimitReached,
    #[serde(rename = "Public access")]
    PublicAccess,
    #[serde(rename = "No permission granted")]
    NoPermissionGranted,
    #[serde(rename = "Permission expired")]
    PermissionExpired,
    #[serde(rename = "User download limit reached")]
    UserDownloadLimitReached,
    #[serde(rename = "User permission")]
    UserPermission,
    /// The file has no contract at all; nothing restricts it.
    #[serde(rename = "No contract")]
    NoContract,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::ContractExpired => "Contract expired",
            AccessReason::OwnerAccess => "Owner access",
            AccessReason::DownloadLimitReached => "Download limit reached",
            AccessReason::PublicAccess => "Public access",
            AccessReason::NoPermissionGranted => "No permission granted",
            AccessReason::PermissionExpired => "Permission expired",
            AccessReason::UserDownloadLimitReached => "User download limit reached",
            AccessReason::UserPermission => "User permission",
            AccessReason::NoContract => "No contract",
        }
    }
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an access check. A denial is a normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    pub fn allow(reason: AccessReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    pub fn deny(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Kind of access being logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessAction {
    Download,
    View,
    Other(String),
}

impl AccessAction {
    pub fn as_str(&self) -> &str {
        match self {
            AccessAction::Download => "download",
            AccessAction::View => "view",
            AccessAction::Other(action) => action,
        }
    }
}

impl From<String> for AccessAction {
    fn from(action: String) -> Self {
        match action.as_str() {
            "download" => AccessAction::Download,
            "view" => AccessAction::View,
            _ => AccessAction::Other(action),
        }
    }
}

impl From<&str> for AccessAction {
    fn from(action: &str) -> Self {
        AccessAction::from(action.to_string())
    }
}

impl From<AccessAction> for String {
    fn from(action: AccessAction) -> Self {
        match action {
            AccessAction::Other(action) => action,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one access attempt. Never edited or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub action: AccessAction,
    pub success: bool,
    pub reason: String,
}

/// Per-user grant on a private contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    /// Ceiling on this user's downloads; `None` is unlimited.
    #[serde(default, deserialize_with = "download_cap::deserialize")]
    pub max_downloads: Option<NonZeroU32>,
    /// Successful logged downloads under this grant.
    pub downloads_used: u32,
    pub expiration: Option<DateTime<Utc>>,
}

impl Permission {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| now > expiration)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_downloads
            .is_some_and(|max| self.downloads_used >= max.get())
    }
}

/// Download caps as stored. A stored `0` reads back as no cap.
pub(crate) mod download_cap {
    use serde::{Deserialize, Deserializer};
    use std::num::NonZeroU32;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NonZeroU32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u32>::deserialize(deserializer)?.and_then(NonZeroU32::new))
    }
}

/// Outcome of a download attempt against an existing contract.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadAttempt<T> {
    Denied(AccessDecision),
    /// Allowed, with whatever recording the download produced.
    Granted(AccessDecision, T),
}

/// The implicit contract states, derived from the field combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    UnrestrictedPublic,
    PublicCapped,
    PrivateNoGrants,
    PrivateGranted,
    Expired,
}

/// Summary counters for one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractStats {
    pub contract_id: String,
    pub file_hash: String,
    pub owner: String,
    pub is_public: bool,
    pub total_permissions: usize,
    pub total_accesses: usize,
    pub successful_downloads: usize,
    pub failed_accesses: usize,
    pub creation_time: DateTime<Utc>,
    pub expiration: Option<DateTime<Utc>>,
}
