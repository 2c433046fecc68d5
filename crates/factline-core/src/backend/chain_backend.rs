//! The classic hash-chain modeled as a backend variant.
//!
//! Instead of maintaining a second, parallel hashing scheme, the chain tier
//! implements [`LedgerBackend`] over the same anchor map the other tiers
//! use, and additionally groups every accepted submission batch into a
//! Merkle-rooted [`Block`](crate::chain::Block) appended to a
//! [`Chain`](crate::chain::Chain). The block data items are the batch's
//! anchor hashes, so the chain proves the order and grouping of
//! submissions while the map serves point lookups.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use super::{
    AnchorRecord, BackendStats, BatchSubmitResult, LedgerBackend, LedgerError, ListQuery,
    SubmitReceipt, SubmitStatus, VerifyOutcome, filter_and_sort, type_histogram,
};
use crate::anchor::Anchor;
use crate::chain::{Block, Chain, ChainError};
use crate::crypto::normalize_digest;

#[derive(Debug)]
struct ChainState {
    chain: Chain,
    records: HashMap<String, AnchorRecord>,
}

/// Backend coupling the anchor map with a Merkle-rooted block chain.
///
/// The record map is volatile; the chain itself may be file-backed, in
/// which case the block structure (and with it the tamper-evident
/// submission order) survives restarts.
#[derive(Debug)]
pub struct ChainBackend {
    state: Mutex<ChainState>,
}

impl Default for ChainBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBackend {
    /// Creates a fully in-memory chain backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                chain: Chain::new(),
                records: HashMap::new(),
            }),
        }
    }

    /// Creates a chain backend whose block chain persists to `path`.
    ///
    /// An existing chain file is loaded (falling back to genesis if absent
    /// or corrupt); the record map always starts empty.
    #[must_use]
    pub fn with_chain_file(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(ChainState {
                chain: Chain::load(path),
                records: HashMap::new(),
            }),
        }
    }

    /// Whether the underlying chain validates end to end.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn is_chain_valid(&self) -> bool {
        self.state.lock().expect("lock poisoned").chain.is_valid()
    }

    /// Number of blocks in the underlying chain, genesis included.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.state.lock().expect("lock poisoned").chain.len()
    }

    /// A snapshot of the underlying blocks, ordered by index.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.state
            .lock()
            .expect("lock poisoned")
            .chain
            .blocks()
            .to_vec()
    }

    fn map_chain_error(error: &ChainError) -> LedgerError {
        LedgerError::Persistence {
            detail: error.to_string(),
        }
    }
}

impl LedgerBackend for ChainBackend {
    fn submit_anchor(&self, anchor: &Anchor) -> Result<SubmitReceipt, LedgerError> {
        let anchor_hash = anchor.anchor_hash().to_string();

        let mut state = self.state.lock().expect("lock poisoned");
        if state.records.contains_key(&anchor_hash) {
            return Ok(SubmitReceipt {
                status: SubmitStatus::Exists,
                anchor_hash,
            });
        }

        state.records.insert(
            anchor_hash.clone(),
            AnchorRecord::from_anchor(anchor, Utc::now()),
        );

        if let Err(error) = state.chain.add_block(vec![anchor_hash.clone()]) {
            let ledger_error = Self::map_chain_error(&error);
            state.records.remove(&anchor_hash);
            return Err(ledger_error);
        }

        Ok(SubmitReceipt {
            status: SubmitStatus::Submitted,
            anchor_hash,
        })
    }

    fn submit_anchors(&self, anchors: &[Anchor]) -> Result<BatchSubmitResult, LedgerError> {
        // One lock and, for the fresh subset, one Merkle-rooted block.
        let mut state = self.state.lock().expect("lock poisoned");
        let mut result = BatchSubmitResult::default();
        let mut fresh: Vec<String> = Vec::new();
        let stored_at = Utc::now();

        for anchor in anchors {
            let anchor_hash = anchor.anchor_hash().to_string();
            if state.records.contains_key(&anchor_hash) {
                result.exists += 1;
                continue;
            }
            state.records.insert(
                anchor_hash.clone(),
                AnchorRecord::from_anchor(anchor, stored_at),
            );
            fresh.push(anchor_hash);
            result.submitted += 1;
        }

        if !fresh.is_empty() {
            if let Err(error) = state.chain.add_block(fresh.clone()) {
                let ledger_error = Self::map_chain_error(&error);
                for hash in &fresh {
                    state.records.remove(hash);
                }
                return Err(ledger_error);
            }
        }

        Ok(result)
    }

    fn verify_anchor(&self, anchor_hash: &str) -> Result<VerifyOutcome, LedgerError> {
        let key = normalize_digest(anchor_hash)?;
        let state = self.state.lock().expect("lock poisoned");
        Ok(state
            .records
            .get(&key)
            .map(AnchorRecord::verify_outcome)
            .unwrap_or_default())
    }

    fn get_anchor(&self, anchor_hash: &str) -> Result<Option<AnchorRecord>, LedgerError> {
        let key = normalize_digest(anchor_hash)?;
        let state = self.state.lock().expect("lock poisoned");
        Ok(state.records.get(&key).cloned())
    }

    fn list_anchors(&self, query: &ListQuery) -> Result<Vec<AnchorRecord>, LedgerError> {
        let snapshot: Vec<AnchorRecord> = {
            let state = self.state.lock().expect("lock poisoned");
            state.records.values().cloned().collect()
        };
        Ok(filter_and_sort(snapshot, query))
    }

    fn backend_type(&self) -> &'static str {
        "chain"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn stats(&self) -> BackendStats {
        let state = self.state.lock().expect("lock poisoned");
        BackendStats {
            backend_type: "chain".to_string(),
            anchor_count: state.records.len(),
            by_type: type_histogram(state.records.values()),
            capacity: None,
            updated_at: None,
        }
    }
}
