//! Durable JSON-on-disk backend.
//!
//! The "private/local" storage tier: the anchor map persisted as a single
//! JSON document with a metadata envelope, loaded eagerly at construction.
//! Every mutation rewrites the whole document to a temp file followed by an
//! atomic rename, so a reader never observes a half-written file and a
//! crash mid-write leaves the previous valid file intact.
//!
//! An absent file starts an empty ledger; a corrupt file logs a warning and
//! starts empty rather than failing startup. Integrity of whatever state
//! does exist remains provable through the anchors' own hashes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    AnchorRecord, BackendStats, BatchSubmitResult, LedgerBackend, LedgerError, ListQuery,
    SubmitReceipt, SubmitStatus, VerifyOutcome, filter_and_sort, type_histogram,
};
use crate::anchor::Anchor;
use crate::crypto::normalize_digest;
use crate::persist::atomic_write;

/// Document schema version written to the metadata envelope.
pub const FORMAT_VERSION: &str = "1.0";

/// Default maximum anchor count before submissions are rejected.
pub const DEFAULT_MAX_ANCHORS: usize = 100_000;

/// Metadata envelope of the persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMetadata {
    version: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    anchor_count: usize,
}

/// The persisted document: metadata envelope plus the anchor map.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    metadata: DocumentMetadata,
    anchors: BTreeMap<String, AnchorRecord>,
}

#[derive(Debug)]
struct FileState {
    anchors: HashMap<String, AnchorRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Outcome of a bulk [`FileBackend::import_anchors`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Records newly stored or overwritten.
    pub imported: usize,
    /// Records skipped because their hash was already present.
    pub skipped: usize,
    /// Records rejected by the capacity limit.
    pub rejected: usize,
}

/// Durable backend persisting the anchor map as one JSON document.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    max_anchors: usize,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Opens (or starts) a ledger at `path` with the default capacity.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_max_anchors(path, DEFAULT_MAX_ANCHORS)
    }

    /// Opens (or starts) a ledger at `path` with an explicit capacity.
    #[must_use]
    pub fn with_max_anchors(path: impl Into<PathBuf>, max_anchors: usize) -> Self {
        let path = path.into();
        let state = load_state(&path);
        Self {
            path,
            max_anchors,
            state: Mutex::new(state),
        }
    }

    /// The path of the persisted document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured maximum anchor count.
    #[must_use]
    pub fn max_anchors(&self) -> usize {
        self.max_anchors
    }

    /// Bulk-imports records, used by migration tooling.
    ///
    /// Records whose hash is already present are skipped unless `overwrite`
    /// is set; the capacity limit applies to newly added records. One
    /// document rewrite covers the whole import.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Persistence`] if the document rewrite fails;
    /// the in-memory state is rolled back in that case.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    pub fn import_anchors(
        &self,
        records: &[AnchorRecord],
        overwrite: bool,
    ) -> Result<ImportOutcome, LedgerError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let before: Vec<(String, Option<AnchorRecord>)> = records
            .iter()
            .map(|r| (r.anchor_hash.clone(), state.anchors.get(&r.anchor_hash).cloned()))
            .collect();

        let mut outcome = ImportOutcome::default();
        for record in records {
            let present = state.anchors.contains_key(&record.anchor_hash);
            if present && !overwrite {
                outcome.skipped += 1;
                continue;
            }
            if !present && state.anchors.len() >= self.max_anchors {
                outcome.rejected += 1;
                continue;
            }
            state
                .anchors
                .insert(record.anchor_hash.clone(), record.clone());
            outcome.imported += 1;
        }

        if outcome.imported > 0 {
            if let Err(error) = self.persist_locked(&mut state) {
                // Roll back to the pre-import entries so memory and disk
                // stay consistent.
                for (hash, previous) in before {
                    match previous {
                        Some(record) => {
                            state.anchors.insert(hash, record);
                        }
                        None => {
                            state.anchors.remove(&hash);
                        }
                    }
                }
                return Err(error);
            }
        }

        Ok(outcome)
    }

    /// Serializes and atomically rewrites the document for the given state.
    fn persist_locked(&self, state: &mut FileState) -> Result<(), LedgerError> {
        state.updated_at = Utc::now();
        let document = LedgerDocument {
            metadata: DocumentMetadata {
                version: FORMAT_VERSION.to_string(),
                created_at: state.created_at,
                updated_at: state.updated_at,
                anchor_count: state.anchors.len(),
            },
            anchors: state
                .anchors
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let bytes = serde_json::to_vec_pretty(&document)?;
        atomic_write(&self.path, &bytes).map_err(|e| LedgerError::Persistence {
            detail: format!("cannot write {}: {e}", self.path.display()),
        })
    }
}

/// Eagerly loads the document at `path`, falling back to an empty state on
/// absence or corruption.
fn load_state(path: &Path) -> FileState {
    let now = Utc::now();
    let empty = || FileState {
        anchors: HashMap::new(),
        created_at: now,
        updated_at: now,
    };

    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<LedgerDocument>(&bytes) {
            Ok(document) => FileState {
                anchors: document.anchors.into_iter().collect(),
                created_at: document.metadata.created_at,
                updated_at: document.metadata.updated_at,
            },
            Err(error) => {
                warn!(path = %path.display(), %error, "ledger file is corrupt, starting empty");
                empty()
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => empty(),
        Err(error) => {
            warn!(path = %path.display(), %error, "ledger file is unreadable, starting empty");
            empty()
        }
    }
}

impl LedgerBackend for FileBackend {
    fn submit_anchor(&self, anchor: &Anchor) -> Result<SubmitReceipt, LedgerError> {
        let anchor_hash = anchor.anchor_hash().to_string();

        let mut state = self.state.lock().expect("lock poisoned");
        if state.anchors.contains_key(&anchor_hash) {
            return Ok(SubmitReceipt {
                status: SubmitStatus::Exists,
                anchor_hash,
            });
        }

        if state.anchors.len() >= self.max_anchors {
            return Err(LedgerError::CapacityExceeded {
                count: state.anchors.len(),
                max: self.max_anchors,
            });
        }

        state.anchors.insert(
            anchor_hash.clone(),
            AnchorRecord::from_anchor(anchor, Utc::now()),
        );

        if let Err(error) = self.persist_locked(&mut state) {
            state.anchors.remove(&anchor_hash);
            return Err(error);
        }

        Ok(SubmitReceipt {
            status: SubmitStatus::Submitted,
            anchor_hash,
        })
    }

    fn submit_anchors(&self, anchors: &[Anchor]) -> Result<BatchSubmitResult, LedgerError> {
        // One lock and one document rewrite for the whole batch.
        let mut state = self.state.lock().expect("lock poisoned");
        let mut result = BatchSubmitResult::default();
        let mut inserted: Vec<String> = Vec::new();
        let stored_at = Utc::now();

        for anchor in anchors {
            let anchor_hash = anchor.anchor_hash().to_string();
            if state.anchors.contains_key(&anchor_hash) {
                result.exists += 1;
                continue;
            }
            if state.anchors.len() >= self.max_anchors {
                result.record_failure(format!(
                    "{anchor_hash}: ledger at capacity ({} of {})",
                    state.anchors.len(),
                    self.max_anchors
                ));
                continue;
            }
            state.anchors.insert(
                anchor_hash.clone(),
                AnchorRecord::from_anchor(anchor, stored_at),
            );
            inserted.push(anchor_hash);
            result.submitted += 1;
        }

        if !inserted.is_empty() {
            if let Err(error) = self.persist_locked(&mut state) {
                for hash in &inserted {
                    state.anchors.remove(hash);
                }
                return Err(error);
            }
        }

        Ok(result)
    }

    fn verify_anchor(&self, anchor_hash: &str) -> Result<VerifyOutcome, LedgerError> {
        let key = normalize_digest(anchor_hash)?;
        let state = self.state.lock().expect("lock poisoned");
        Ok(state
            .anchors
            .get(&key)
            .map(AnchorRecord::verify_outcome)
            .unwrap_or_default())
    }

    fn get_anchor(&self, anchor_hash: &str) -> Result<Option<AnchorRecord>, LedgerError> {
        let key = normalize_digest(anchor_hash)?;
        let state = self.state.lock().expect("lock poisoned");
        Ok(state.anchors.get(&key).cloned())
    }

    fn list_anchors(&self, query: &ListQuery) -> Result<Vec<AnchorRecord>, LedgerError> {
        let snapshot: Vec<AnchorRecord> = {
            let state = self.state.lock().expect("lock poisoned");
            state.anchors.values().cloned().collect()
        };
        Ok(filter_and_sort(snapshot, query))
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn stats(&self) -> BackendStats {
        let state = self.state.lock().expect("lock poisoned");
        BackendStats {
            backend_type: "file".to_string(),
            anchor_count: state.anchors.len(),
            by_type: type_histogram(state.anchors.values()),
            capacity: Some(self.max_anchors),
            updated_at: Some(state.updated_at),
        }
    }

    fn export_all(&self) -> Result<Vec<AnchorRecord>, LedgerError> {
        let state = self.state.lock().expect("lock poisoned");
        let mut records: Vec<AnchorRecord> = state.anchors.values().cloned().collect();
        super::sort_newest_first(&mut records);
        Ok(records)
    }
}
