use chrono::Duration;
use fileledger_contracts::{AccessReason, ContractError, ContractsDocument};
use fileledger_core::{
    AccessPolicy, CoreError, DownloadOutcome, FileLedger, FileLedgerConfig, UploadRequest,
};
use fileledger_ledger::{FileQuery, Ledger, LedgerDocument, LedgerError};
use fileledger_storage::MemoryStore;
use fileledger_types::{FileUpload, Transaction};
use fileledger_verification::{VerificationDocument, VerificationStatus};
use std::num::NonZeroU32;
use std::sync::Arc;
use tempfile::TempDir;

fn in_memory(difficulty: u32) -> FileLedger {
    FileLedger::with_stores(
        Arc::new(MemoryStore::<LedgerDocument>::new("ledger")),
        Arc::new(MemoryStore::<ContractsDocument>::new("contracts")),
        Arc::new(MemoryStore::<VerificationDocument>::new("verifications")),
        difficulty,
    )
    .unwrap()
}

fn config_in(dir: &TempDir) -> FileLedgerConfig {
    FileLedgerConfig {
        data_dir: dir.path().to_path_buf(),
        difficulty: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn upload_records_block_and_contract() {
    let service = in_memory(2);
    let receipt = service
        .upload(UploadRequest::new("a.txt", "h1", 10, "alice", "uploads/a.txt"))
        .await
        .unwrap();

    assert_eq!(receipt.block.index, 1);
    assert!(receipt.block.hash.starts_with("00"));
    assert_eq!(receipt.contract_id, "contract_h1");
    assert!(receipt.contract_created);
    assert!(matches!(receipt.block.payload, Transaction::FileUpload(_)));

    let owner = service.with_contracts(|contracts| contracts.get("h1").map(|c| c.owner.clone()));
    assert_eq!(owner.as_deref(), Some("alice"));
    assert!(service.validate());
}

#[tokio::test]
async fn download_limit_scenario_end_to_end() {
    let service = in_memory(1);
    service
        .upload(UploadRequest::new("a.txt", "h1", 10, "alice", "uploads/a.txt"))
        .await
        .unwrap();
    service.with_contracts(|contracts| {
        contracts.grant_permission("h1", "bob", None, NonZeroU32::new(1))
    })
    .unwrap();

    let first = service.download("h1", "bob").await.unwrap();
    match &first {
        DownloadOutcome::Granted {
            decision, block, ..
        } => {
            assert_eq!(decision.reason, AccessReason::UserPermission);
            assert!(matches!(block.payload, Transaction::FileDownload(_)));
        }
        other => panic!("expected a granted download, got {other:?}"),
    }

    let second = service.download("h1", "bob").await.unwrap();
    assert_eq!(
        second.decision().map(|decision| decision.reason),
        Some(AccessReason::UserDownloadLimitReached)
    );
    assert!(!second.is_granted());

    // Both attempts are in the audit log, only one reached the ledger.
    let stats = service.with_contracts(|contracts| contracts.stats("h1").unwrap());
    assert_eq!(stats.total_accesses, 2);
    assert_eq!(stats.failed_accesses, 1);
    assert_eq!(service.stats().ledger.total_downloads, 1);
}

#[tokio::test]
async fn upload_policy_applies_to_new_contracts_only() {
    let service = in_memory(0);
    let policy = AccessPolicy {
        is_public: Some(true),
        max_downloads: NonZeroU32::new(1),
        expiration: Some(Duration::hours(1)),
    };
    service
        .upload(UploadRequest::new("a.txt", "h1", 10, "alice", "a").with_policy(policy))
        .await
        .unwrap();

    assert!(service.download("h1", "bob").await.unwrap().is_granted());
    let denied = service.download("h1", "carol").await.unwrap();
    assert_eq!(
        denied.decision().map(|decision| decision.reason),
        Some(AccessReason::DownloadLimitReached)
    );

    // Same content from someone else keeps alice's contract untouched.
    let again = service
        .upload(
            UploadRequest::new("copy.txt", "h1", 10, "mallory", "b").with_policy(AccessPolicy {
                max_downloads: NonZeroU32::new(50),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert!(!again.contract_created);
    assert_eq!(again.contract_id, "contract_h1");
    let contract = service.with_contracts(|contracts| contracts.get("h1").cloned().unwrap());
    assert_eq!(contract.owner, "alice");
    assert_eq!(contract.max_downloads, NonZeroU32::new(1));
}

#[tokio::test]
async fn unknown_and_uncontracted_files() {
    // A ledger written before any contract existed.
    let ledger_store = Arc::new(MemoryStore::<LedgerDocument>::new("ledger"));
    let mut ledger = Ledger::open(ledger_store.clone(), 0).unwrap();
    ledger
        .append(FileUpload::new("legacy.txt", "old", 1, "alice", "p", false, None, 1, None))
        .unwrap();
    drop(ledger);

    let service = FileLedger::with_stores(
        ledger_store,
        Arc::new(MemoryStore::<ContractsDocument>::new("contracts")),
        Arc::new(MemoryStore::<VerificationDocument>::new("verifications")),
        0,
    )
    .unwrap();

    assert_eq!(
        service.download("missing", "bob").await.unwrap(),
        DownloadOutcome::NotFound
    );
    let granted = service.download("old", "bob").await.unwrap();
    assert!(granted.is_granted());
    assert_eq!(
        granted.decision().map(|decision| decision.reason),
        Some(AccessReason::NoContract)
    );
    service.with_ledger(|ledger| assert_eq!(ledger.len(), 3));
}

#[tokio::test]
async fn rejected_download_leaves_contract_untouched() {
    let service = in_memory(0);
    let policy = AccessPolicy {
        is_public: Some(true),
        max_downloads: NonZeroU32::new(1),
        ..Default::default()
    };
    service
        .upload(UploadRequest::new("a.txt", "h1", 10, "alice", "a").with_policy(policy))
        .await
        .unwrap();

    assert!(matches!(
        service.download("h1", "  ").await,
        Err(CoreError::Ledger(LedgerError::InvalidTransaction(_)))
    ));
    let stats = service.with_contracts(|contracts| contracts.stats("h1").unwrap());
    assert_eq!(stats.total_accesses, 0);
    assert_eq!(service.stats().ledger.total_downloads, 0);

    let granted = service.download("h1", "bob").await.unwrap();
    assert_eq!(
        granted.decision().map(|decision| decision.reason),
        Some(AccessReason::PublicAccess)
    );
    assert_eq!(service.stats().ledger.total_downloads, 1);
}

#[tokio::test]
async fn oversized_expiration_is_rejected_before_sealing() {
    let service = in_memory(0);
    let policy = AccessPolicy {
        expiration: Duration::try_hours(3_000_000_000),
        ..Default::default()
    };
    let result = service
        .upload(UploadRequest::new("a.txt", "h1", 10, "alice", "a").with_policy(policy))
        .await;

    assert!(matches!(
        result,
        Err(CoreError::Contract(ContractError::ExpirationOutOfRange { .. }))
    ));
    service.with_ledger(|ledger| assert_eq!(ledger.len(), 1));
    assert_eq!(service.stats().contracts, 0);
}

#[tokio::test]
async fn concurrent_uploads_of_same_content_keep_first_block_owner() {
    let service = in_memory(1);
    let mut tasks = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .upload(UploadRequest::new(
                    "same.bin",
                    "shared",
                    4,
                    format!("user{i}"),
                    "p",
                ))
                .await
        }));
    }
    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().contract_created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let first_uploader = service.with_ledger(|ledger| {
        ledger
            .blocks()
            .iter()
            .find_map(|block| match &block.payload {
                Transaction::FileUpload(upload) => Some(upload.uploader.clone()),
                _ => None,
            })
            .unwrap()
    });
    let owner =
        service.with_contracts(|contracts| contracts.get("shared").map(|c| c.owner.clone()));
    assert_eq!(owner, Some(first_uploader));
}

#[tokio::test]
async fn versions_search_and_verification_join() {
    let service = in_memory(0);
    let plan = service.plan_upload("report.txt");
    assert_eq!(plan.version, 1);
    service
        .upload(UploadRequest::new("report.txt", "v1", 10, "alice", "a").versioned(&plan))
        .await
        .unwrap();

    let plan = service.plan_upload("report.txt");
    assert_eq!(plan.version, 2);
    assert_eq!(plan.previous_version_hash.as_deref(), Some("v1"));
    assert_eq!(plan.stored_name, "report_v2.txt");
    service
        .upload(UploadRequest::new("report.txt", "v2", 12, "alice", "b").versioned(&plan))
        .await
        .unwrap();
    service
        .upload(UploadRequest::new("photo.png", "p1", 99, "bob", "c").encrypted("c2FsdA=="))
        .await
        .unwrap();

    service.verify("v2", "carol", true, "matches upstream").unwrap();
    assert!(matches!(
        service.verify("", "carol", true, ""),
        Err(CoreError::Verification(_))
    ));

    let hits = service.search(&FileQuery {
        text: Some("report".into()),
        ..Default::default()
    });
    assert_eq!(hits.len(), 2);
    let v2 = hits.iter().find(|hit| hit.file.file_hash == "v2").unwrap();
    assert_eq!(v2.verification_status, VerificationStatus::Verified);
    assert_eq!(v2.authenticity_score, 100.0);

    let details = service.file_details("v2").unwrap();
    assert_eq!(details.file.version, 2);
    assert_eq!(details.versions.len(), 2);
    assert_eq!(details.contract.unwrap().owner, "alice");
    assert!(service.file_details("nope").is_none());

    let stats = service.stats();
    assert_eq!(stats.ledger.total_uploads, 3);
    assert_eq!(stats.ledger.encrypted_files, 1);
    assert_eq!(stats.contracts, 3);
    assert_eq!(stats.verification.total_votes, 1);
    assert_eq!(service.top_verifiers(5)[0].user, "carol");
}

#[tokio::test]
async fn concurrent_uploads_keep_chain_valid() {
    let service = in_memory(1);
    let mut tasks = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .upload(UploadRequest::new(
                    format!("f{i}.bin"),
                    format!("h{i}"),
                    i,
                    "alice",
                    "p",
                ))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(service.validate());
    assert_eq!(service.files().len(), 8);
    service.with_ledger(|ledger| {
        for (position, block) in ledger.blocks().iter().enumerate() {
            assert_eq!(block.index, position as u64);
        }
    });
}

#[tokio::test]
async fn data_directory_reopens_with_same_state() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    {
        let service = FileLedger::open(&config).unwrap();
        assert!(matches!(
            FileLedger::open(&config),
            Err(CoreError::Locked { .. })
        ));
        service
            .upload(UploadRequest::new("a.txt", "h1", 10, "alice", "a"))
            .await
            .unwrap();
        service.download("h1", "alice").await.unwrap();
        service.verify("h1", "bob", false, "").unwrap();
        assert!(!service.pending_flush());
    }

    assert!(config.ledger_path().exists());
    assert!(config.contracts_path().exists());
    assert!(config.verifications_path().exists());

    let reopened = FileLedger::open(&config).unwrap();
    assert!(reopened.validate());
    assert_eq!(reopened.stats().ledger.total_blocks, 3);
    assert_eq!(
        reopened.file_verification("h1").status,
        VerificationStatus::Suspicious
    );
    let access = reopened.with_contracts(|contracts| contracts.check_access("h1", "carol"));
    assert_eq!(access.map(|decision| decision.reason), Some(AccessReason::NoPermissionGranted));
    reopened.flush().unwrap();
}
