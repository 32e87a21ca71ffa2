use fileledger_ledger::{FileQuery, IntegrityViolation, Ledger, LedgerDocument, LedgerError};
use fileledger_storage::{JsonFileStore, MemoryStore, SnapshotStore};
use fileledger_types::{Block, FileDownload, FileUpload, Transaction};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn memory_store() -> Arc<MemoryStore<LedgerDocument>> {
    Arc::new(MemoryStore::new("ledger"))
}

fn upload(name: &str, hash: &str, size: u64, uploader: &str) -> FileUpload {
    FileUpload::new(name, hash, size, uploader, format!("uploads/{name}"), false, None, 1, None)
}

/// Reopen a copy of `ledger` whose stored chain was edited by `edit`.
fn reopen_tampered(ledger: &Ledger, edit: impl FnOnce(&mut Vec<Block>)) -> Ledger {
    let mut doc = ledger.document();
    edit(&mut doc.chain);
    let store = memory_store();
    store.save(&doc).unwrap();
    Ledger::open(store, doc.difficulty).unwrap()
}

#[test]
fn genesis_then_upload_scenario() {
    let mut ledger = Ledger::open(memory_store(), 2).unwrap();
    assert_eq!(ledger.len(), 1);
    let genesis = &ledger.blocks()[0];
    assert!(genesis.hash.starts_with("00"));
    assert_eq!(genesis.previous_hash, "0");

    ledger.record_upload(upload("a.txt", "h1", 10, "alice")).unwrap();

    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.files_by_hash()["h1"].file_name, "a.txt");
    assert!(ledger.validate());
}

#[test]
fn append_links_and_meets_difficulty() {
    let mut ledger = Ledger::open(memory_store(), 2).unwrap();
    for i in 0..4 {
        let prior = ledger.last_block().unwrap().hash.clone();
        let block = ledger
            .append(upload(&format!("f{i}.txt"), &format!("h{i}"), i, "alice"))
            .unwrap();
        assert_eq!(block.previous_hash, prior);
        assert_eq!(block.index, i + 1);
        assert!(block.hash.starts_with("00"));
    }
    assert!(ledger.validate());
}

#[test]
fn tampering_is_detected() {
    let mut ledger = Ledger::open(memory_store(), 1).unwrap();
    ledger.append(upload("a.txt", "h1", 10, "alice")).unwrap();
    ledger.append(FileDownload::new("a.txt", "h1", "bob")).unwrap();
    ledger.append(upload("b.txt", "h2", 20, "carol")).unwrap();
    assert!(reopen_tampered(&ledger, |_| {}).validate());

    let payload = reopen_tampered(&ledger, |chain| {
        if let Transaction::FileUpload(upload) = &mut chain[1].payload {
            upload.file_size = 999;
        }
    });
    assert_eq!(
        payload.verify_integrity(),
        Err(IntegrityViolation::HashMismatch { index: 1 })
    );

    let hash = reopen_tampered(&ledger, |chain| {
        let last = chain[2].hash.pop();
        chain[2].hash.push(if last == Some('a') { 'b' } else { 'a' });
    });
    assert!(!hash.validate());

    let link = reopen_tampered(&ledger, |chain| {
        chain[3].previous_hash = "0".repeat(64);
    });
    assert!(!link.validate());

    // Re-sealing an edited block keeps it self-consistent but breaks the next link.
    let resealed = reopen_tampered(&ledger, |chain| {
        if let Transaction::FileUpload(upload) = &mut chain[1].payload {
            upload.uploader = "mallory".into();
        }
        chain[1].seal(1);
    });
    assert_eq!(
        resealed.verify_integrity(),
        Err(IntegrityViolation::BrokenLink { index: 2, previous: 1 })
    );
    assert!(matches!(
        resealed.ensure_valid(),
        Err(LedgerError::Integrity(_))
    ));
}

#[test]
fn reload_from_disk_yields_identical_views() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blockchain.json");

    let mut original = Ledger::open(Arc::new(JsonFileStore::<LedgerDocument>::new(&path)), 2).unwrap();
    original.append(upload("a.txt", "h1", 10, "alice")).unwrap();
    original.append(upload("b.pdf", "h2", 30, "bob")).unwrap();
    original.append(FileDownload::new("a.txt", "h1", "carol")).unwrap();

    // Difficulty passed on reopen is ignored in favour of the stored one.
    let reloaded = Ledger::open(Arc::new(JsonFileStore::<LedgerDocument>::new(&path)), 0).unwrap();

    assert_eq!(reloaded.difficulty(), 2);
    assert_eq!(reloaded.blocks(), original.blocks());
    assert_eq!(*reloaded.files_by_hash(), *original.files_by_hash());
    assert_eq!(reloaded.stats(), original.stats());
    assert_eq!(reloaded.analytics(10), original.analytics(10));
    assert!(reloaded.validate());
}

#[test]
fn write_failures_are_advisory() {
    let store = memory_store();
    let mut ledger = Ledger::open(store.clone(), 1).unwrap();
    store.reject_writes(true);

    let block = ledger.append(upload("a.txt", "h1", 10, "alice")).unwrap();
    assert_eq!(block.index, 1);
    assert_eq!(ledger.len(), 2);
    assert!(ledger.pending_flush());
    assert!(ledger.flush().is_err());

    store.reject_writes(false);
    ledger.flush().unwrap();
    assert!(!ledger.pending_flush());
    assert_eq!(store.load().unwrap().unwrap().chain.len(), 2);
}

#[test]
fn malformed_store_falls_back_to_genesis() {
    let store = memory_store();
    store.put_raw(b"{\"difficulty\": 2, \"chain\": [".to_vec());

    let ledger = Ledger::open(store.clone(), 1).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.difficulty(), 1);
    assert!(ledger.validate());
    // The fresh genesis replaced the broken snapshot.
    assert_eq!(store.load().unwrap().unwrap().chain.len(), 1);
}

#[test]
fn rejects_bad_difficulty_and_transactions() {
    assert!(matches!(
        Ledger::open(memory_store(), 9),
        Err(LedgerError::InvalidDifficulty { difficulty: 9, .. })
    ));

    let mut ledger = Ledger::open(memory_store(), 0).unwrap();
    let err = ledger.append(upload("", "h1", 1, "alice")).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransaction(_)));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn reset_returns_to_single_genesis() {
    let store = memory_store();
    let mut ledger = Ledger::open(store.clone(), 1).unwrap();
    ledger.append(upload("a.txt", "h1", 10, "alice")).unwrap();
    ledger.reset();

    assert_eq!(ledger.len(), 1);
    assert!(ledger.validate());
    assert!(ledger.files().is_empty());
    assert_eq!(store.load().unwrap().unwrap().chain.len(), 1);
}

#[test]
fn stats_and_search_follow_appends() {
    let mut ledger = Ledger::open(memory_store(), 0).unwrap();
    ledger.append(upload("a.txt", "h1", 10, "alice")).unwrap();
    assert_eq!(ledger.stats().total_uploads, 1);

    let mut secret = upload("s.zip", "h2", 5, "bob");
    secret.is_encrypted = true;
    ledger.append(secret).unwrap();

    let stats = ledger.stats();
    assert_eq!(stats.total_uploads, 2);
    assert_eq!(stats.encrypted_files, 1);
    assert!(stats.is_valid);

    let hits = ledger.search(&FileQuery {
        encrypted_only: true,
        ..Default::default()
    });
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_hash, "h2");
    assert_eq!(ledger.file("h1").unwrap().uploader, "alice");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_payload_edit_invalidates(target in 1usize..4, size in 1_000u64..2_000) {
        let mut ledger = Ledger::open(memory_store(), 1).unwrap();
        for i in 0..3u64 {
            ledger.append(upload(&format!("f{i}.bin"), &format!("h{i}"), i, "alice")).unwrap();
        }
        let tampered = reopen_tampered(&ledger, |chain| {
            if let Transaction::FileUpload(upload) = &mut chain[target].payload {
                upload.file_size = size;
            }
        });
        prop_assert!(!tampered.validate());
    }
}
