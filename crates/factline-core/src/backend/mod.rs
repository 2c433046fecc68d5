//! Pluggable persistence backends for anchor records.
//!
//! The [`LedgerBackend`] trait is the persistence contract every storage
//! tier implements: submit, verify-existence, fetch, list, identity,
//! readiness, and stats. All operations are keyed by the normalized anchor
//! hash (lower-case, no `0x` prefix).
//!
//! # Append-only semantics
//!
//! Backends store anchors once and never rewrite them. Submission is
//! idempotent: the same anchor hash submitted twice returns `Exists` and
//! never duplicates storage. The check-then-insert sequence is atomic under
//! the backend's own lock; that is the load-bearing invariant for
//! duplicate suppression under concurrent writers, and callers (including
//! the [`Migrator`](crate::migrate::Migrator)) must rely on it rather than
//! on separately-locked existence probes.

pub mod file;
pub mod memory;

mod chain_backend;


use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use chain_backend::ChainBackend;
pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::anchor::{Anchor, AnchorType, ValidationError};
use crate::crypto::HashError;

/// Upper bound on error messages retained in a [`BatchSubmitResult`].
pub const MAX_BATCH_ERRORS: usize = 32;

/// Errors from backend operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The backend is not ready to accept operations.
    #[error("backend '{backend}' is not ready")]
    Unavailable {
        /// The backend's identifying tag.
        backend: String,
    },

    /// The backend is at its configured maximum anchor count.
    #[error("ledger at capacity: {count} of {max} anchors stored")]
    CapacityExceeded {
        /// Current stored anchor count.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A caller-supplied hash is not a valid 64-hex digest.
    #[error("invalid anchor hash: {0}")]
    InvalidDigest(#[from] HashError),

    /// Reading or writing persistent state failed.
    #[error("persistence error: {detail}")]
    Persistence {
        /// Description of the failure.
        detail: String,
    },

    /// Serializing or deserializing stored state failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    /// The anchor was stored by this submission.
    Submitted,
    /// An anchor with this hash was already stored; nothing was written.
    Exists,
}

/// Receipt returned by [`LedgerBackend::submit_anchor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Whether the anchor was newly stored or already present.
    pub status: SubmitStatus,
    /// The normalized anchor hash the record is keyed by.
    pub anchor_hash: String,
}

/// Aggregated outcome of a batch submission.
#[derive(Debug, Clone, Default)]
pub struct BatchSubmitResult {
    /// Anchors newly stored.
    pub submitted: usize,
    /// Anchors already present (duplicate-suppressed).
    pub exists: usize,
    /// Anchors that failed to store.
    pub failed: usize,
    /// Messages for the first [`MAX_BATCH_ERRORS`] failures.
    pub errors: Vec<String>,
}

impl BatchSubmitResult {
    /// Total anchors the batch attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.submitted + self.exists + self.failed
    }

    pub(crate) fn record_receipt(&mut self, receipt: &SubmitReceipt) {
        match receipt.status {
            SubmitStatus::Submitted => self.submitted += 1,
            SubmitStatus::Exists => self.exists += 1,
        }
    }

    pub(crate) fn record_failure(&mut self, message: String) {
        self.failed += 1;
        if self.errors.len() < MAX_BATCH_ERRORS {
            self.errors.push(message);
        }
    }
}

/// Existence probe result: metadata only, never stored content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Whether an anchor with the probed hash is recorded.
    pub exists: bool,
    /// The recorded anchor's type, when present.
    pub anchor_type: Option<AnchorType>,
    /// The recorded anchor's timestamp, when present.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Filters for [`LedgerBackend::list_anchors`].
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Maximum records to return.
    pub limit: usize,
    /// Restrict to one anchor type.
    pub anchor_type: Option<AnchorType>,
    /// Restrict to anchors at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            anchor_type: None,
            since: None,
        }
    }
}

impl ListQuery {
    /// A query returning up to `limit` newest records, unfiltered.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn matches(&self, record: &AnchorRecord) -> bool {
        if let Some(anchor_type) = &self.anchor_type {
            if &record.anchor_type != anchor_type {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Counts and identity reported by [`LedgerBackend::stats`].
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// The backend's identifying tag.
    pub backend_type: String,
    /// Total stored anchors.
    pub anchor_count: usize,
    /// Stored anchors per type tag.
    pub by_type: BTreeMap<String, usize>,
    /// Configured maximum anchor count, for bounded backends.
    pub capacity: Option<usize>,
    /// Last mutation instant, for durable backends.
    pub updated_at: Option<DateTime<Utc>>,
}

/// The stored form of an anchor: its fields plus the storage instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// The normalized hash the record is keyed by.
    pub anchor_hash: String,
    /// The anchor's type tag.
    pub anchor_type: AnchorType,
    /// Caller-supplied identifier of the anchored thing.
    pub source_id: String,
    /// Content digest; the content itself is never stored.
    pub data_hash: String,
    /// Deduplicated participant identifiers.
    pub participants: Vec<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, Value>,
    /// The anchor's creation instant.
    pub timestamp: DateTime<Utc>,
    /// Optional back-reference to a logically prior anchor.
    pub previous_anchor_ref: Option<String>,
    /// When this backend stored the record.
    pub stored_at: DateTime<Utc>,
}

impl AnchorRecord {
    /// Builds the stored form of `anchor`, stamped with `stored_at`.
    #[must_use]
    pub fn from_anchor(anchor: &Anchor, stored_at: DateTime<Utc>) -> Self {
        Self {
            anchor_hash: anchor.anchor_hash().to_string(),
            anchor_type: anchor.anchor_type().clone(),
            source_id: anchor.source_id().to_string(),
            data_hash: anchor.data_hash().to_string(),
            participants: anchor.participants().to_vec(),
            metadata: anchor.metadata().clone(),
            timestamp: anchor.timestamp(),
            previous_anchor_ref: anchor.previous_anchor_ref().map(String::from),
            stored_at,
        }
    }

    /// Reconstructs the [`Anchor`] this record serialized.
    ///
    /// The rebuilt anchor recomputes its hash from the stored fields;
    /// callers comparing it against [`AnchorRecord::anchor_hash`] detect
    /// records corrupted in storage.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the stored fields no longer pass
    /// construction validation.
    pub fn to_anchor(&self) -> Result<Anchor, ValidationError> {
        let mut builder = Anchor::builder(
            self.anchor_type.clone(),
            self.source_id.clone(),
            self.data_hash.clone(),
        )
        .participants(self.participants.iter().cloned())
        .metadata(self.metadata.clone())
        .timestamp(self.timestamp);

        if let Some(reference) = &self.previous_anchor_ref {
            builder = builder.previous_anchor_ref(reference.clone());
        }

        builder.build()
    }

    fn verify_outcome(&self) -> VerifyOutcome {
        VerifyOutcome {
            exists: true,
            anchor_type: Some(self.anchor_type.clone()),
            timestamp: Some(self.timestamp),
        }
    }
}

/// Persistence contract for anchor storage tiers.
///
/// All hash parameters accept un-normalized digests (`0x` prefix,
/// upper-case); implementations normalize before keying.
pub trait LedgerBackend: Send + Sync {
    /// Stores `anchor` if its hash is not yet recorded.
    ///
    /// Idempotent: a duplicate hash returns [`SubmitStatus::Exists`] and
    /// never duplicates storage. Exactly one of any set of concurrent
    /// same-hash submissions observes [`SubmitStatus::Submitted`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unavailable`] if the backend is not ready
    /// - [`LedgerError::CapacityExceeded`] for bounded backends at capacity
    /// - [`LedgerError::Persistence`] if the durable write fails
    fn submit_anchor(&self, anchor: &Anchor) -> Result<SubmitReceipt, LedgerError>;

    /// Stores a batch of anchors.
    ///
    /// The default implementation submits each anchor sequentially,
    /// collecting per-item failures instead of aborting; backends may
    /// override for efficiency.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] if the backend is not ready;
    /// per-item failures are counted in the result, not raised.
    fn submit_anchors(&self, anchors: &[Anchor]) -> Result<BatchSubmitResult, LedgerError> {
        if !self.is_ready() {
            return Err(LedgerError::Unavailable {
                backend: self.backend_type().to_string(),
            });
        }

        let mut result = BatchSubmitResult::default();
        for anchor in anchors {
            match self.submit_anchor(anchor) {
                Ok(receipt) => result.record_receipt(&receipt),
                Err(error) => {
                    result.record_failure(format!("{}: {error}", anchor.anchor_hash()));
                }
            }
        }
        Ok(result)
    }

    /// Probes whether `anchor_hash` is recorded; returns type and
    /// timestamp metadata only, never stored content.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidDigest`] on a malformed hash.
    fn verify_anchor(&self, anchor_hash: &str) -> Result<VerifyOutcome, LedgerError>;

    /// Fetches the full stored record for `anchor_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidDigest`] on a malformed hash.
    fn get_anchor(&self, anchor_hash: &str) -> Result<Option<AnchorRecord>, LedgerError>;

    /// Lists stored records newest-first, filtered by the query.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Persistence`] if stored state cannot be read.
    fn list_anchors(&self, query: &ListQuery) -> Result<Vec<AnchorRecord>, LedgerError>;

    /// The backend's identifying tag.
    fn backend_type(&self) -> &'static str;

    /// Whether the backend can currently accept operations.
    fn is_ready(&self) -> bool;

    /// Counts and metadata about stored state.
    fn stats(&self) -> BackendStats;

    /// Exports every stored record, used by migration.
    ///
    /// The default implementation lists with an unbounded limit; backends
    /// with a cheaper bulk path may override.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Persistence`] if stored state cannot be read.
    fn export_all(&self) -> Result<Vec<AnchorRecord>, LedgerError> {
        self.list_anchors(&ListQuery::with_limit(usize::MAX))
    }
}

/// Sorts records newest-first by timestamp, then by storage instant.
pub(crate) fn sort_newest_first(records: &mut [AnchorRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.stored_at.cmp(&a.stored_at))
    });
}

/// Shared list implementation over a snapshot of records.
pub(crate) fn filter_and_sort(
    mut records: Vec<AnchorRecord>,
    query: &ListQuery,
) -> Vec<AnchorRecord> {
    records.retain(|record| query.matches(record));
    sort_newest_first(&mut records);
    records.truncate(query.limit);
    records
}

/// Shared stats histogram over a snapshot of records.
pub(crate) fn type_histogram<'a>(
    records: impl IntoIterator<Item = &'a AnchorRecord>,
) -> BTreeMap<String, usize> {
    let mut by_type = BTreeMap::new();
    for record in records {
        *by_type
            .entry(record.anchor_type.tag().to_string())
            .or_insert(0) += 1;
    }
    by_type
}
