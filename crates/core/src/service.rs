//! The coordinator: sequences ledger, contract and verification calls for the
//! upload, download and verification paths.

use crate::config::FileLedgerConfig;
use crate::errors::{CoreError, Result};
use crate::lock::DataDirLock;
use chrono::{DateTime, Duration, Utc};
use fileledger_contracts::{
    contract_id_for, expiration_after, AccessDecision, AccessReason, ContractManager,
    ContractStats, ContractStore, ContractsDocument, DownloadAttempt,
};
use fileledger_ledger::{
    Analytics, ChainStats, FileQuery, FileRecord, Ledger, LedgerDocument, LedgerError,
    LedgerStore, VersionEntry, VersionPlan,
};
use fileledger_storage::JsonFileStore;
use fileledger_types::{Block, FileDownload, FileUpload, Transaction};
use fileledger_verification::{
    FileVerification, VerificationDocument, VerificationRegistry, VerificationStats,
    VerificationStatus, VerificationStore, VerifierRank,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{info, warn};

/// Access settings applied to the contract of a newly uploaded file.
///
/// Unset fields leave the contract at its private, unlimited default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPolicy {
    pub is_public: Option<bool>,
    pub max_downloads: Option<NonZeroU32>,
    pub expiration: Option<Duration>,
}

/// Everything the upload path knows about a stored file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub file_name: String,
    pub file_hash: String,
    pub file_size: u64,
    pub uploader: String,
    pub file_path: String,
    pub is_encrypted: bool,
    pub salt: Option<String>,
    pub version: u32,
    pub previous_version_hash: Option<String>,
    pub policy: AccessPolicy,
}

impl UploadRequest {
    /// A first-version, unencrypted upload with the default policy.
    pub fn new(
        file_name: impl Into<String>,
        file_hash: impl Into<String>,
        file_size: u64,
        uploader: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_hash: file_hash.into(),
            file_size,
            uploader: uploader.into(),
            file_path: file_path.into(),
            is_encrypted: false,
            salt: None,
            version: 1,
            previous_version_hash: None,
            policy: AccessPolicy::default(),
        }
    }

    /// Record this upload as the version described by `plan`.
    pub fn versioned(mut self, plan: &VersionPlan) -> Self {
        self.file_name = plan.stored_name.clone();
        self.version = plan.version;
        self.previous_version_hash = plan.previous_version_hash.clone();
        self
    }

    pub fn encrypted(mut self, salt: impl Into<String>) -> Self {
        self.is_encrypted = true;
        self.salt = Some(salt.into());
        self
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn to_transaction(&self) -> FileUpload {
        FileUpload::new(
            self.file_name.clone(),
            self.file_hash.clone(),
            self.file_size,
            self.uploader.clone(),
            self.file_path.clone(),
            self.is_encrypted,
            self.salt.clone(),
            self.version,
            self.previous_version_hash.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub block: Block,
    pub contract_id: String,
    /// False when identical content was already under contract; the existing
    /// contract and its owner are kept.
    pub contract_created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    NotFound,
    Granted {
        decision: AccessDecision,
        file: FileRecord,
        block: Block,
    },
    Denied {
        decision: AccessDecision,
    },
}

impl DownloadOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, DownloadOutcome::Granted { .. })
    }

    pub fn decision(&self) -> Option<&AccessDecision> {
        match self {
            DownloadOutcome::NotFound => None,
            DownloadOutcome::Granted { decision, .. } | DownloadOutcome::Denied { decision } => {
                Some(decision)
            }
        }
    }
}

/// A file record joined with its verification status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(flatten)]
    pub file: FileRecord,
    pub authenticity_score: f64,
    pub verification_status: VerificationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDetails {
    pub file: FileRecord,
    pub versions: Vec<VersionEntry>,
    pub verification: FileVerification,
    pub contract: Option<ContractStats>,
}

/// Combined view of all three stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub ledger: ChainStats,
    pub contracts: usize,
    pub verification: VerificationStats,
}

/// Handle to one fileledger instance. Clones share the same state.
///
/// The ledger sits behind a read/write lock so views run together while an
/// append holds it exclusively; contracts and verifications each sit behind
/// their own mutex.
#[derive(Clone)]
pub struct FileLedger {
    ledger: Arc<RwLock<Ledger>>,
    contracts: Arc<Mutex<ContractManager>>,
    verifications: Arc<Mutex<VerificationRegistry>>,
    _lock: Option<Arc<DataDirLock>>,
}

impl FileLedger {
    /// Lock `config.data_dir` and open the JSON stores inside it.
    pub fn open(config: &FileLedgerConfig) -> Result<Self> {
        config.validate()?;
        let lock = DataDirLock::acquire(&config.data_dir, "fileledger")?;

        let ledger_store: LedgerStore =
            Arc::new(JsonFileStore::<LedgerDocument>::new(config.ledger_path()));
        let contract_store: ContractStore =
            Arc::new(JsonFileStore::<ContractsDocument>::new(config.contracts_path()));
        let verification_store: VerificationStore = Arc::new(
            JsonFileStore::<VerificationDocument>::new(config.verifications_path()),
        );

        let mut service = Self::with_stores(
            ledger_store,
            contract_store,
            verification_store,
            config.difficulty,
        )?;
        service._lock = Some(Arc::new(lock));
        info!(data_dir = %config.data_dir.display(), "fileledger opened");
        Ok(service)
    }

    /// Build an instance over arbitrary stores, without a directory lock.
    pub fn with_stores(
        ledger_store: LedgerStore,
        contract_store: ContractStore,
        verification_store: VerificationStore,
        difficulty: u32,
    ) -> Result<Self> {
        Ok(Self {
            ledger: Arc::new(RwLock::new(Ledger::open(ledger_store, difficulty)?)),
            contracts: Arc::new(Mutex::new(ContractManager::open(contract_store))),
            verifications: Arc::new(Mutex::new(VerificationRegistry::open(verification_store))),
            _lock: None,
        })
    }

    /// Record an upload and put the file under a contract owned by the
    /// uploader.
    ///
    /// Sealing runs on the blocking pool with the contracts locked, so the
    /// first upload block for some content and its contract owner always
    /// agree. The policy only applies when this upload created the contract.
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        let expiration = request
            .policy
            .expiration
            .map(|duration| expiration_after(Utc::now(), duration))
            .transpose()?;
        let ledger = self.ledger.clone();
        let contracts = self.contracts.clone();
        let (block, contract_created, request) = tokio::task::spawn_blocking(move || {
            let mut contracts = contracts.lock();
            let block = ledger.write().record_upload(request.to_transaction())?;
            let created = contracts
                .create_contract(request.file_hash.as_str(), request.uploader.as_str())
                .is_some();
            if created {
                apply_policy(&mut contracts, &request.file_hash, &request.policy, expiration);
            }
            Ok::<_, CoreError>((block, created, request))
        })
        .await??;

        if !contract_created {
            warn!(
                file_hash = %request.file_hash,
                uploader = %request.uploader,
                "Content already under contract, keeping existing owner"
            );
        }
        info!(
            index = block.index,
            file_name = %request.file_name,
            uploader = %request.uploader,
            "File uploaded"
        );
        Ok(UploadReceipt {
            block,
            contract_id: contract_id_for(&request.file_hash),
            contract_created,
        })
    }

    /// Check `user`'s access to `file_hash` and, when allowed, record the
    /// download on the ledger.
    ///
    /// Denied attempts are logged on the contract. An allowed attempt counts
    /// against the contract only once its block is sealed. A file uploaded
    /// before contracts existed has none and is open to all.
    pub async fn download(&self, file_hash: &str, user: &str) -> Result<DownloadOutcome> {
        let ledger = self.ledger.clone();
        let contracts = self.contracts.clone();
        let file_hash = file_hash.to_string();
        let user = user.to_string();
        tokio::task::spawn_blocking(move || {
            settle_download(&mut contracts.lock(), &mut ledger.write(), &file_hash, &user)
        })
        .await?
    }

    pub fn verify(
        &self,
        file_hash: &str,
        user: &str,
        is_authentic: bool,
        comment: &str,
    ) -> Result<FileVerification> {
        Ok(self
            .verifications
            .lock()
            .submit_verification(file_hash, user, is_authentic, comment)?)
    }

    /// Version number and stored name a new upload of `file_name` would get.
    pub fn plan_upload(&self, file_name: &str) -> VersionPlan {
        self.ledger.read().next_version(file_name)
    }

    pub fn files(&self) -> Vec<FileListing> {
        let files = self.ledger.read().files();
        self.with_verification(files)
    }

    pub fn search(&self, query: &FileQuery) -> Vec<FileListing> {
        let files = self.ledger.read().search(query);
        self.with_verification(files)
    }

    fn with_verification(&self, files: Vec<FileRecord>) -> Vec<FileListing> {
        let verifications = self.verifications.lock();
        files
            .into_iter()
            .map(|file| {
                let verification = verifications.file_verification(&file.file_hash);
                FileListing {
                    authenticity_score: verification.record.authenticity_score,
                    verification_status: verification.status,
                    file,
                }
            })
            .collect()
    }

    pub fn file_details(&self, file_hash: &str) -> Option<FileDetails> {
        let (file, versions) = {
            let ledger = self.ledger.read();
            let file = ledger.file(file_hash)?;
            let versions = ledger.file_versions(&file.file_name);
            (file, versions)
        };
        Some(FileDetails {
            verification: self.verifications.lock().file_verification(file_hash),
            contract: self.contracts.lock().stats(file_hash),
            file,
            versions,
        })
    }

    pub fn file_versions(&self, file_name: &str) -> Vec<VersionEntry> {
        self.ledger.read().file_versions(file_name)
    }

    pub fn stats(&self) -> SystemStats {
        // One lock at a time; upload and download nest contracts over ledger.
        let ledger = self.ledger.read().stats();
        let contracts = self.contracts.lock().len();
        let verification = self.verifications.lock().stats();
        SystemStats {
            ledger,
            contracts,
            verification,
        }
    }

    pub fn analytics(&self, top_n: usize) -> Analytics {
        self.ledger.read().analytics(top_n)
    }

    pub fn validate(&self) -> bool {
        self.ledger.read().validate()
    }

    pub fn file_verification(&self, file_hash: &str) -> FileVerification {
        self.verifications.lock().file_verification(file_hash)
    }

    pub fn verification_stats(&self) -> VerificationStats {
        self.verifications.lock().stats()
    }

    pub fn top_verifiers(&self, limit: usize) -> Vec<VerifierRank> {
        self.verifications.lock().top_verifiers(limit)
    }

    /// Run `f` against the contract manager, e.g. to grant or revoke access.
    pub fn with_contracts<R>(&self, f: impl FnOnce(&mut ContractManager) -> R) -> R {
        f(&mut self.contracts.lock())
    }

    /// Run `f` against the ledger under its read lock.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.ledger.read())
    }

    /// True when any component holds state its store has not yet accepted.
    pub fn pending_flush(&self) -> bool {
        let ledger = self.ledger.read().pending_flush();
        let contracts = self.contracts.lock().pending_flush();
        let verifications = self.verifications.lock().pending_flush();
        ledger || contracts || verifications
    }

    /// Retry persistence of every component, returning the first failure.
    pub fn flush(&self) -> Result<()> {
        self.ledger.write().flush()?;
        self.contracts.lock().flush()?;
        self.verifications.lock().flush()?;
        Ok(())
    }
}

fn apply_policy(
    contracts: &mut ContractManager,
    file_hash: &str,
    policy: &AccessPolicy,
    expiration: Option<DateTime<Utc>>,
) {
    if let Some(is_public) = policy.is_public {
        contracts.set_public_access(file_hash, is_public);
    }
    if policy.max_downloads.is_some() {
        contracts.set_max_downloads(file_hash, policy.max_downloads);
    }
    if expiration.is_some() {
        contracts.set_expiration_at(file_hash, expiration);
    }
}

/// Decide one download and record it. Callers hold the contracts before the
/// ledger, the same order `upload` takes them in.
fn settle_download(
    contracts: &mut ContractManager,
    ledger: &mut Ledger,
    file_hash: &str,
    user: &str,
) -> Result<DownloadOutcome> {
    let Some(file) = ledger.file(file_hash) else {
        return Ok(DownloadOutcome::NotFound);
    };
    let transaction = FileDownload::new(file.file_name.clone(), file_hash, user);
    Transaction::from(transaction.clone())
        .validate()
        .map_err(LedgerError::from)?;

    let attempt = match contracts.authorize_download(file_hash, user, |_| {
        ledger.record_download(transaction.clone())
    }) {
        Some(attempt) => attempt?,
        None => DownloadAttempt::Granted(
            AccessDecision::allow(AccessReason::NoContract),
            ledger.record_download(transaction)?,
        ),
    };

    Ok(match attempt {
        DownloadAttempt::Denied(decision) => {
            info!(file_hash, user, reason = %decision.reason, "Download denied");
            DownloadOutcome::Denied { decision }
        }
        DownloadAttempt::Granted(decision, block) => {
            info!(file_hash, user, index = block.index, "Download granted");
            DownloadOutcome::Granted {
                decision,
                file,
                block,
            }
        }
    })
}
