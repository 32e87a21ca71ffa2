//! The ledger: an append-only, hash-linked, proof-of-work sealed block list.

use crate::errors::{IntegrityViolation, LedgerError, Result};
use crate::views::{self, Analytics, ChainStats, FileQuery, FileRecord, VersionEntry, VersionPlan};
use fileledger_storage::{load_or_fresh, SnapshotStore};
use fileledger_types::{
    Block, FileDownload, FileUpload, Hash, Transaction, GENESIS_PREVIOUS_HASH, MAX_DIFFICULTY,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Persisted layout of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub difficulty: u32,
    pub chain: Vec<Block>,
}

pub type LedgerStore = Arc<dyn SnapshotStore<LedgerDocument>>;

/// Views cached against the chain length they were computed for.
#[derive(Default)]
struct ViewCache {
    inner: Mutex<Option<CachedViews>>,
}

struct CachedViews {
    chain_len: usize,
    files: Arc<BTreeMap<Hash, FileRecord>>,
    is_valid: Option<bool>,
}

impl ViewCache {
    fn files(&self, chain: &[Block]) -> Arc<BTreeMap<Hash, FileRecord>> {
        let mut guard = self.inner.lock();
        match guard.as_ref() {
            Some(cached) if cached.chain_len == chain.len() => cached.files.clone(),
            _ => {
                let files = Arc::new(views::files_by_hash(chain));
                *guard = Some(CachedViews {
                    chain_len: chain.len(),
                    files: files.clone(),
                    is_valid: None,
                });
                files
            }
        }
    }

    fn validity(&self, chain_len: usize, compute: impl FnOnce() -> bool) -> bool {
        let mut guard = self.inner.lock();
        if let Some(cached) = guard.as_mut() {
            if cached.chain_len == chain_len {
                return *cached.is_valid.get_or_insert_with(compute);
            }
        }
        compute()
    }

    fn invalidate(&self) {
        *self.inner.lock() = None;
    }
}

/// Single-writer ledger of file events.
///
/// All mutation goes through `&mut self`; callers that share a ledger across
/// threads wrap it in a `RwLock` so reads run together and never overlap an
/// append.
pub struct Ledger {
    chain: Vec<Block>,
    difficulty: u32,
    store: LedgerStore,
    /// Set when the last snapshot write failed and memory is ahead of disk.
    pending_flush: bool,
    cache: ViewCache,
}

impl Ledger {
    /// Restore the ledger from `store`, or seal a fresh genesis block.
    ///
    /// A stored chain is adopted verbatim, including its difficulty; hashes
    /// are trusted until [`Ledger::validate`] is called.
    pub fn open(store: LedgerStore, difficulty: u32) -> Result<Self> {
        check_difficulty(difficulty)?;

        let restored = load_or_fresh(store.as_ref()).filter(|doc: &LedgerDocument| {
            if doc.chain.is_empty() {
                warn!(store = %store.describe(), "Stored ledger has no blocks, ignoring it");
                return false;
            }
            if doc.difficulty > MAX_DIFFICULTY {
                warn!(
                    store = %store.describe(),
                    difficulty = doc.difficulty,
                    "Stored ledger difficulty out of range, ignoring it"
                );
                return false;
            }
            true
        });

        match restored {
            Some(doc) => {
                info!(
                    blocks = doc.chain.len(),
                    difficulty = doc.difficulty,
                    "Loaded ledger from {}",
                    store.describe()
                );
                Ok(Self {
                    chain: doc.chain,
                    difficulty: doc.difficulty,
                    store,
                    pending_flush: false,
                    cache: ViewCache::default(),
                })
            }
            None => {
                let mut ledger = Self {
                    chain: Vec::new(),
                    difficulty,
                    store,
                    pending_flush: false,
                    cache: ViewCache::default(),
                };
                ledger.install_genesis();
                Ok(ledger)
            }
        }
    }

    fn install_genesis(&mut self) {
        let genesis = Block::genesis(self.difficulty);
        info!(hash = %genesis.hash, difficulty = self.difficulty, "Sealed genesis block");
        self.chain = vec![genesis];
        self.cache.invalidate();
        self.persist();
    }

    /// Seal `transaction` into a new block, append it and persist the chain.
    ///
    /// Blocks the caller for the duration of the proof-of-work search.
    pub fn append(&mut self, transaction: impl Into<Transaction>) -> Result<Block> {
        let transaction = transaction.into();
        transaction.validate()?;

        let index = self.chain.len() as u64;
        let previous_hash = self
            .chain
            .last()
            .map(|block| block.hash.clone())
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());

        let mut block = Block::new(index, transaction, previous_hash);
        block.seal(self.difficulty);
        debug!(
            index,
            nonce = block.nonce,
            hash = %block.hash,
            kind = block.payload.kind(),
            "Sealed block"
        );

        self.chain.push(block.clone());
        self.cache.invalidate();
        self.persist();
        Ok(block)
    }

    /// Append a file upload event.
    pub fn record_upload(&mut self, upload: FileUpload) -> Result<Block> {
        self.append(upload)
    }

    /// Append a file download event.
    pub fn record_download(&mut self, download: FileDownload) -> Result<Block> {
        self.append(download)
    }

    /// Discard every block and start over from a fresh genesis.
    pub fn reset(&mut self) {
        warn!(discarded = self.chain.len(), "Resetting ledger");
        self.install_genesis();
    }

    /// Write the chain to the store. Failures are logged and remembered, the
    /// in-memory chain is kept either way.
    fn persist(&mut self) {
        match self.store.save(&self.document()) {
            Ok(()) => self.pending_flush = false,
            Err(err) => {
                error!(
                    store = %self.store.describe(),
                    error = %err,
                    blocks = self.chain.len(),
                    "Failed to persist ledger, continuing in memory"
                );
                self.pending_flush = true;
            }
        }
    }

    /// Retry persistence, surfacing the error this time.
    pub fn flush(&mut self) -> Result<()> {
        self.store.save(&self.document())?;
        self.pending_flush = false;
        Ok(())
    }

    /// True when the in-memory chain has not reached the store.
    pub fn pending_flush(&self) -> bool {
        self.pending_flush
    }

    /// Snapshot of the persisted layout.
    pub fn document(&self) -> LedgerDocument {
        LedgerDocument {
            difficulty: self.difficulty,
            chain: self.chain.clone(),
        }
    }

    /// True when every block recomputes, links and meets the difficulty.
    pub fn validate(&self) -> bool {
        self.verify_integrity().is_ok()
    }

    /// Walk the chain and report the first violation, without repairing it.
    pub fn verify_integrity(&self) -> std::result::Result<(), IntegrityViolation> {
        let genesis = self.chain.first().ok_or(IntegrityViolation::EmptyChain)?;
        if !matches!(genesis.payload, Transaction::Genesis { .. })
            || genesis.previous_hash != GENESIS_PREVIOUS_HASH
        {
            return Err(IntegrityViolation::MalformedGenesis);
        }

        for (position, block) in self.chain.iter().enumerate() {
            if block.index != position as u64 {
                return Err(IntegrityViolation::IndexMismatch {
                    position,
                    index: block.index,
                });
            }
            if !block.has_consistent_hash() {
                return Err(IntegrityViolation::HashMismatch { index: block.index });
            }
            if position > 0 {
                let previous = &self.chain[position - 1];
                if block.previous_hash != previous.hash {
                    return Err(IntegrityViolation::BrokenLink {
                        index: block.index,
                        previous: previous.index,
                    });
                }
            }
            if !block.is_sealed(self.difficulty) {
                return Err(IntegrityViolation::InsufficientWork {
                    index: block.index,
                    difficulty: self.difficulty,
                });
            }
        }
        Ok(())
    }

    /// [`Ledger::verify_integrity`] as a [`LedgerError`].
    pub fn ensure_valid(&self) -> Result<()> {
        self.verify_integrity().map_err(LedgerError::from)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Latest upload record per content hash.
    pub fn files_by_hash(&self) -> Arc<BTreeMap<Hash, FileRecord>> {
        self.cache.files(&self.chain)
    }

    /// Latest upload record for `file_hash`.
    pub fn file(&self, file_hash: &str) -> Option<FileRecord> {
        self.files_by_hash().get(file_hash).cloned()
    }

    /// All known files, ordered by the block that last recorded them.
    pub fn files(&self) -> Vec<FileRecord> {
        views::files_in_chain_order(&self.files_by_hash())
    }

    pub fn file_versions(&self, file_name: &str) -> Vec<VersionEntry> {
        views::file_versions(&self.chain, file_name)
    }

    pub fn next_version(&self, file_name: &str) -> VersionPlan {
        views::next_version(&self.chain, file_name)
    }

    pub fn stats(&self) -> ChainStats {
        let is_valid = self.cache.validity(self.chain.len(), || self.validate());
        views::chain_stats(&self.chain, self.difficulty, is_valid)
    }

    pub fn analytics(&self, top_n: usize) -> Analytics {
        views::analytics(&self.chain, top_n)
    }

    pub fn search(&self, query: &FileQuery) -> Vec<FileRecord> {
        views::search(&self.files_by_hash(), query)
    }
}

fn check_difficulty(difficulty: u32) -> Result<()> {
    if difficulty > MAX_DIFFICULTY {
        return Err(LedgerError::InvalidDifficulty {
            difficulty,
            max: MAX_DIFFICULTY,
        });
    }
    Ok(())
}
