//! Hash-chained, Merkle-rooted block ledger.
//!
//! The classic chain representation groups many data items into a single
//! [`Block`] whose Merkle root summarizes them, chained to the previous
//! block's hash. [`Chain::validate`] walks the whole chain and detects any
//! mutation of a stored block's data, link, or root.
//!
//! Persistence is a JSON array of block records, fully rewritten on every
//! append. That is a deliberate non-goal trade-off: no incremental
//! persistence at the scale this component targets. An absent or corrupt
//! chain file falls back to a fresh chain containing only the genesis
//! block; availability is preferred over perfect durability for this tier.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::canonical;
use crate::crypto::{AnchorHasher, ZERO_DIGEST};
use crate::merkle::MerkleTree;
use crate::persist::atomic_write;

/// Errors from chain validation and persistence.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    /// A block's `previous_hash` does not match its predecessor's hash.
    #[error("chain broken at block {index}: previous_hash does not match predecessor")]
    BrokenLink {
        /// Index of the block whose link is broken.
        index: u64,
    },

    /// A block's stored hash does not match its recomputed hash.
    #[error("hash mismatch at block {index}: stored hash does not match recomputed hash")]
    HashMismatch {
        /// Index of the mutated block.
        index: u64,
    },

    /// A block's stored Merkle root does not match its recomputed root.
    #[error("merkle root mismatch at block {index}: stored root does not match data")]
    RootMismatch {
        /// Index of the mutated block.
        index: u64,
    },

    /// The chain's index sequence is not contiguous from zero.
    #[error("invalid block index at position {position}: expected {expected}")]
    IndexGap {
        /// Position in the block vector.
        position: usize,
        /// The index that was expected there.
        expected: u64,
    },

    /// Writing the chain file failed.
    #[error("chain persistence failed: {detail}")]
    Persistence {
        /// Description of the failure.
        detail: String,
    },
}

/// One Merkle-rooted block in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Monotonic position, starting at 0 for genesis.
    pub index: u64,
    /// Creation instant (UTC).
    pub timestamp: DateTime<Utc>,
    /// The ordered, opaque data items this block groups.
    pub data: Vec<String>,
    /// Hash of the previous block; the zero digest for genesis.
    pub previous_hash: String,
    /// Merkle root over `data`.
    pub merkle_root: String,
    /// This block's own hash, derived from all other fields.
    pub hash: String,
}

impl Block {
    /// The genesis block: index 0, epoch timestamp, zero-digest sentinels.
    #[must_use]
    pub fn genesis() -> Self {
        let timestamp = DateTime::<Utc>::UNIX_EPOCH;
        let hash = compute_block_hash(0, timestamp, &[], ZERO_DIGEST, ZERO_DIGEST);
        Self {
            index: 0,
            timestamp,
            data: Vec::new(),
            previous_hash: ZERO_DIGEST.to_string(),
            merkle_root: ZERO_DIGEST.to_string(),
            hash,
        }
    }

    /// Recomputes this block's hash from its current fields.
    #[must_use]
    pub fn recompute_hash(&self) -> String {
        compute_block_hash(
            self.index,
            self.timestamp,
            &self.data,
            &self.previous_hash,
            &self.merkle_root,
        )
    }
}

/// Hashes a block's fields over their canonical rendering.
fn compute_block_hash(
    index: u64,
    timestamp: DateTime<Utc>,
    data: &[String],
    previous_hash: &str,
    merkle_root: &str,
) -> String {
    let payload = json!({
        "index": index,
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "data": data,
        "previous_hash": previous_hash,
        "merkle_root": merkle_root,
    });
    // The payload is flat; canonicalization cannot hit the depth cap.
    let canonical = canonical::to_canonical_string(&payload).unwrap_or_default();
    AnchorHasher::hash_str(&canonical)
}

/// An ordered chain of Merkle-rooted blocks with optional file backing.
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Block>,
    path: Option<PathBuf>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// Creates an in-memory chain containing only the genesis block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            path: None,
        }
    }

    /// Loads a chain from `path`, or starts fresh if the file is absent or
    /// corrupt.
    ///
    /// Corruption is recoverable by policy: the chain logs a warning and
    /// continues from genesis rather than failing startup. Integrity of
    /// whatever state does exist remains provable via [`Chain::validate`].
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let blocks = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Block>>(&bytes) {
                Ok(blocks) if !blocks.is_empty() => Some(blocks),
                Ok(_) => {
                    warn!(path = %path.display(), "chain file is empty, starting fresh");
                    None
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "chain file is corrupt, starting fresh");
                    None
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => {
                warn!(path = %path.display(), %error, "chain file is unreadable, starting fresh");
                None
            }
        };

        Self {
            blocks: blocks.unwrap_or_else(|| vec![Block::genesis()]),
            path: Some(path),
        }
    }

    /// Appends a Merkle-rooted block over `data`, chained to the current
    /// tip, and persists the whole chain when file-backed.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Persistence`] if the chain file cannot be
    /// written; the in-memory chain is left unchanged in that case.
    pub fn add_block(&mut self, data: Vec<String>) -> Result<&Block, ChainError> {
        let tip = self.tip();
        let index = tip.index + 1;
        let previous_hash = tip.hash.clone();
        let timestamp = Utc::now();
        let merkle_root = MerkleTree::build(&data).root();
        let hash = compute_block_hash(index, timestamp, &data, &previous_hash, &merkle_root);

        self.blocks.push(Block {
            index,
            timestamp,
            data,
            previous_hash,
            merkle_root,
            hash,
        });

        if let Err(error) = self.persist() {
            self.blocks.pop();
            return Err(error);
        }

        Ok(self.tip())
    }

    /// Walks the chain from block 1 onward and reports the first block
    /// whose link, hash, or Merkle root disagrees with its stored value.
    ///
    /// # Errors
    ///
    /// Returns the [`ChainError`] naming the failing block.
    pub fn validate(&self) -> Result<(), ChainError> {
        for (position, block) in self.blocks.iter().enumerate() {
            if block.index != position as u64 {
                return Err(ChainError::IndexGap {
                    position,
                    expected: position as u64,
                });
            }

            // Genesis is a fixed sentinel; only its successors are walked.
            if position == 0 {
                continue;
            }

            if block.previous_hash != self.blocks[position - 1].hash {
                return Err(ChainError::BrokenLink { index: block.index });
            }

            let recomputed_root = MerkleTree::build(&block.data).root();
            if block.merkle_root != recomputed_root {
                return Err(ChainError::RootMismatch { index: block.index });
            }

            if block.hash != block.recompute_hash() {
                return Err(ChainError::HashMismatch { index: block.index });
            }
        }
        Ok(())
    }

    /// Whether the whole chain validates.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// The newest block.
    ///
    /// # Panics
    ///
    /// Never panics: a chain always contains at least the genesis block.
    #[must_use]
    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always contains genesis")
    }

    /// Number of blocks, genesis included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the chain holds only the genesis block.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 1
    }

    /// All blocks, ordered by index.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn persist(&self) -> Result<(), ChainError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(&self.blocks).map_err(|e| ChainError::Persistence {
            detail: format!("cannot serialize chain: {e}"),
        })?;
        atomic_write(path, &bytes).map_err(|e| ChainError::Persistence {
            detail: format!("cannot write {}: {e}", path.display()),
        })
    }

    /// Test-only access used to simulate tampering.
    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_genesis_shape() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, ZERO_DIGEST);
        assert_eq!(genesis.merkle_root, ZERO_DIGEST);
        assert_eq!(genesis.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(genesis.hash, genesis.recompute_hash());
    }

    #[test]
    fn test_add_block_links_to_tip() {
        let mut chain = Chain::new();
        let genesis_hash = chain.tip().hash.clone();

        let block = chain.add_block(vec!["a".to_string()]).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis_hash);
        assert!(chain.is_valid());
    }

    #[test]
    fn test_block_merkle_root_matches_independent_tree() {
        let mut chain = Chain::new();
        chain.add_block(vec!["a".to_string()]).unwrap();
        chain
            .add_block(vec!["b".to_string(), "c".to_string()])
            .unwrap();

        let independent = MerkleTree::build(&["b", "c"]).root();
        assert_eq!(chain.blocks()[2].merkle_root, independent);
    }

    #[test]
    fn test_validate_detects_data_mutation() {
        let mut chain = Chain::new();
        chain
            .add_block(vec!["a".to_string(), "b".to_string()])
            .unwrap();

        chain.blocks_mut()[1].data[0] = "tampered".to_string();

        assert!(matches!(
            chain.validate(),
            Err(ChainError::RootMismatch { index: 1 })
        ));
        assert!(!chain.is_valid());
    }

    #[test]
    fn test_validate_detects_broken_link() {
        let mut chain = Chain::new();
        chain.add_block(vec!["a".to_string()]).unwrap();
        chain.add_block(vec!["b".to_string()]).unwrap();

        chain.blocks_mut()[2].previous_hash = ZERO_DIGEST.to_string();

        assert!(matches!(
            chain.validate(),
            Err(ChainError::BrokenLink { index: 2 })
        ));
    }

    #[test]
    fn test_validate_detects_hash_mutation() {
        let mut chain = Chain::new();
        chain.add_block(vec!["a".to_string()]).unwrap();

        chain.blocks_mut()[1].hash = ZERO_DIGEST.to_string();

        assert!(matches!(
            chain.validate(),
            Err(ChainError::HashMismatch { index: 1 })
        ));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.json");

        let mut chain = Chain::load(path.clone());
        chain.add_block(vec!["a".to_string()]).unwrap();
        chain
            .add_block(vec!["b".to_string(), "c".to_string()])
            .unwrap();

        let reloaded = Chain::load(path);
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded.is_valid());
        assert_eq!(reloaded.tip().hash, chain.tip().hash);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_genesis() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.json");
        std::fs::write(&path, b"{not json").unwrap();

        let chain = Chain::load(path);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tip().index, 0);
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let chain = Chain::load(dir.path().join("absent.json"));
        assert_eq!(chain.len(), 1);
        assert!(chain.is_valid());
    }

    #[test]
    fn test_many_blocks_stay_valid() {
        let mut chain = Chain::new();
        for i in 0..20 {
            let data: Vec<String> = (0..=i % 5).map(|j| format!("item-{i}-{j}")).collect();
            chain.add_block(data).unwrap();
        }
        assert_eq!(chain.len(), 21);
        assert!(chain.is_valid());
    }
}
