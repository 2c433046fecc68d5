//! Volatile in-memory backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::{
    AnchorRecord, BackendStats, BatchSubmitResult, LedgerBackend, LedgerError, ListQuery,
    SubmitReceipt, SubmitStatus, VerifyOutcome, filter_and_sort, type_histogram,
};
use crate::anchor::Anchor;
use crate::crypto::normalize_digest;

/// A mutex-guarded map from normalized hash to record.
///
/// Every read and write acquires the same lock for the duration of the
/// check-then-mutate sequence, so "does it exist, if not insert" is atomic.
/// Data is lost on process restart by design; this tier exists for tests,
/// ephemeral agents, and as the migration counterpart of the durable tiers.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<Mutex<HashMap<String, AnchorRecord>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored anchors.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("lock poisoned").len()
    }

    /// Whether the backend holds no anchors.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().expect("lock poisoned").is_empty()
    }
}

impl LedgerBackend for InMemoryBackend {
    fn submit_anchor(&self, anchor: &Anchor) -> Result<SubmitReceipt, LedgerError> {
        let anchor_hash = anchor.anchor_hash().to_string();

        let mut records = self.records.lock().expect("lock poisoned");
        if records.contains_key(&anchor_hash) {
            return Ok(SubmitReceipt {
                status: SubmitStatus::Exists,
                anchor_hash,
            });
        }

        records.insert(
            anchor_hash.clone(),
            AnchorRecord::from_anchor(anchor, Utc::now()),
        );
        Ok(SubmitReceipt {
            status: SubmitStatus::Submitted,
            anchor_hash,
        })
    }

    fn verify_anchor(&self, anchor_hash: &str) -> Result<VerifyOutcome, LedgerError> {
        let key = normalize_digest(anchor_hash)?;
        let records = self.records.lock().expect("lock poisoned");
        Ok(records
            .get(&key)
            .map(AnchorRecord::verify_outcome)
            .unwrap_or_default())
    }

    fn get_anchor(&self, anchor_hash: &str) -> Result<Option<AnchorRecord>, LedgerError> {
        let key = normalize_digest(anchor_hash)?;
        let records = self.records.lock().expect("lock poisoned");
        Ok(records.get(&key).cloned())
    }

    fn list_anchors(&self, query: &ListQuery) -> Result<Vec<AnchorRecord>, LedgerError> {
        let snapshot: Vec<AnchorRecord> = {
            let records = self.records.lock().expect("lock poisoned");
            records.values().cloned().collect()
        };
        Ok(filter_and_sort(snapshot, query))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn stats(&self) -> BackendStats {
        let records = self.records.lock().expect("lock poisoned");
        BackendStats {
            backend_type: "memory".to_string(),
            anchor_count: records.len(),
            by_type: type_histogram(records.values()),
            capacity: None,
            updated_at: None,
        }
    }

    fn submit_anchors(&self, anchors: &[Anchor]) -> Result<BatchSubmitResult, LedgerError> {
        // Hold the lock once across the whole batch.
        let mut records = self.records.lock().expect("lock poisoned");
        let mut result = BatchSubmitResult::default();
        let stored_at = Utc::now();

        for anchor in anchors {
            let anchor_hash = anchor.anchor_hash().to_string();
            if records.contains_key(&anchor_hash) {
                result.exists += 1;
            } else {
                records.insert(anchor_hash, AnchorRecord::from_anchor(anchor, stored_at));
                result.submitted += 1;
            }
        }
        Ok(result)
    }
}
