use crate::time::unix_timestamp;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest.
pub type Hash = String;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Upper bound on the proof-of-work difficulty accepted anywhere in the system.
/// Each extra hex zero multiplies the expected sealing work by 16.
pub const MAX_DIFFICULTY: u32 = 8;

/// Default number of leading hex zeros a sealed hash must carry.
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// A sealed ledger record: one transaction plus chain linkage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain; genesis is 0.
    pub index: u64,
    /// Creation time, fractional unix seconds.
    pub timestamp: f64,
    pub payload: Transaction,
    /// Hash of the preceding block (`"0"` for genesis).
    pub previous_hash: Hash,
    /// Proof-of-work counter found while sealing.
    pub nonce: u64,
    /// Hash over every other field, see [`Block::compute_hash`].
    pub hash: Hash,
}

impl Block {
    /// Create an unsealed block stamped with the current time.
    pub fn new(index: u64, payload: Transaction, previous_hash: impl Into<Hash>) -> Self {
        Self::new_at_time(index, unix_timestamp(), payload, previous_hash)
    }

    /// Create an unsealed block with an explicit timestamp (for tests/reconstruction).
    pub fn new_at_time(
        index: u64,
        timestamp: f64,
        payload: Transaction,
        previous_hash: impl Into<Hash>,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            payload,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Create and seal the genesis block.
    pub fn genesis(difficulty: u32) -> Self {
        let mut block = Self::new(0, Transaction::genesis(), GENESIS_PREVIOUS_HASH);
        block.seal(difficulty);
        block
    }

    /// Recompute the hash from the block's fields.
    pub fn compute_hash(&self) -> Hash {
        Preimage::new(self).hash_with_nonce(self.nonce)
    }

    /// Search nonces from 0 upward until the hash meets `difficulty`.
    ///
    /// Runs until a nonce is found; callers bound the cost through
    /// [`MAX_DIFFICULTY`].
    pub fn seal(&mut self, difficulty: u32) {
        let preimage = Preimage::new(self);
        let mut nonce = 0u64;
        loop {
            let hash = preimage.hash_with_nonce(nonce);
            if meets_difficulty(&hash, difficulty) {
                self.nonce = nonce;
                self.hash = hash;
                return;
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Stored hash matches the recomputed one.
    pub fn has_consistent_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Stored hash satisfies the proof-of-work target.
    pub fn is_sealed(&self, difficulty: u32) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }
}

/// Lowercase hex SHA-256 of a file's bytes, its identity across the system.
pub fn content_hash(bytes: &[u8]) -> Hash {
    hex::encode(Sha256::digest(bytes))
}

/// True when the first `difficulty` hex characters of `hash` are all `'0'`.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Canonical hashing input, split around the nonce so sealing only
/// re-serializes a decimal counter per attempt.
///
/// The full preimage is the compact JSON object
/// `{"index":..,"nonce":..,"payload":..,"previous_hash":..,"timestamp":..}`
/// with keys in lexicographic order at every nesting level.
struct Preimage {
    head: String,
    tail: String,
}

impl Preimage {
    fn new(block: &Block) -> Self {
        let payload = serde_json::to_value(&block.payload)
            .map(canonicalize)
            .unwrap_or(Value::Null);
        let head = format!("{{\"index\":{},\"nonce\":", block.index);
        let tail = format!(
            ",\"payload\":{},\"previous_hash\":{},\"timestamp\":{}}}",
            payload,
            Value::String(block.previous_hash.clone()),
            float_json(block.timestamp),
        );
        Self { head, tail }
    }

    fn hash_with_nonce(&self, nonce: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.head.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.tail.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Rebuild every object with its keys in sorted order.
///
/// Independent of whether `serde_json` preserves insertion order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn float_json(value: f64) -> String {
    serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
}
