//! Client façade over a backend and its batch processor.
//!
//! [`LedgerClient`] is the single entry point other components use: it
//! combines a [`LedgerBackend`] with a [`BatchProcessor`] behind one API,
//! and offers convenience entry points that hash raw content internally so
//! callers never hand the ledger anything but digests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::anchor::{Anchor, AnchorType, ValidationError};
use crate::backend::{
    AnchorRecord, BackendStats, ChainBackend, FileBackend, InMemoryBackend, LedgerBackend,
    LedgerError, ListQuery, SubmitReceipt, VerifyOutcome,
};
use crate::batch::{BatchConfig, BatchProcessor, BatchStats, FlushOutcome};
use crate::canonical::{self, CanonicalError};
use crate::config::{BackendConfig, LedgerConfig};
use crate::crypto::AnchorHasher;

/// Errors from the client's anchor-building entry points.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The anchor inputs failed construction validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The structured content could not be canonicalized for hashing.
    #[error("cannot hash content: {0}")]
    Canonical(#[from] CanonicalError),

    /// The backend refused or failed the submission.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Optional anchor fields for the convenience entry points.
#[derive(Debug, Clone, Default)]
pub struct AnchorOptions {
    /// Participant identifiers.
    pub participants: Vec<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, Value>,
    /// Timestamp override; defaults to the submission instant.
    pub timestamp: Option<DateTime<Utc>>,
    /// Back-reference to a logically prior anchor.
    pub previous_anchor_ref: Option<String>,
}

/// How a submission was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Written straight through to the backend.
    Stored(SubmitReceipt),
    /// Enqueued for a later batch flush.
    Queued {
        /// One-based queue position at enqueue time.
        queue_position: usize,
    },
}

/// Snapshot of the client's operational state.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    /// The backend's identifying tag.
    pub backend_type: String,
    /// Whether the backend accepts operations.
    pub ready: bool,
    /// Whether batching is enabled.
    pub batching_enabled: bool,
    /// Anchors waiting in the batch queue.
    pub queued: usize,
}

/// Combined backend and queue counters.
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Backend-side counts.
    pub backend: BackendStats,
    /// Queue-side counters.
    pub batch: BatchStats,
}

/// Façade combining a backend and a batch processor behind one API.
pub struct LedgerClient {
    backend: Arc<dyn LedgerBackend>,
    batch: BatchProcessor,
}

impl LedgerClient {
    /// Creates a client over `backend` with the given batching policy.
    #[must_use]
    pub fn new(backend: Arc<dyn LedgerBackend>, batch_config: BatchConfig) -> Self {
        let batch = BatchProcessor::new(Arc::clone(&backend), batch_config);
        Self { backend, batch }
    }

    /// Creates a client over a fresh volatile in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), BatchConfig::default())
    }

    /// Wires a client from configuration.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        let backend: Arc<dyn LedgerBackend> = match &config.backend {
            BackendConfig::Memory => Arc::new(InMemoryBackend::new()),
            BackendConfig::File { path, max_anchors } => {
                Arc::new(FileBackend::with_max_anchors(path, *max_anchors))
            }
            BackendConfig::Chain { path } => match path {
                Some(path) => Arc::new(ChainBackend::with_chain_file(path)),
                None => Arc::new(ChainBackend::new()),
            },
        };
        Self::new(backend, config.batch.to_batch_config())
    }

    /// The underlying backend, shared with migration tooling.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn LedgerBackend> {
        Arc::clone(&self.backend)
    }

    /// Submits an anchor.
    ///
    /// With `async_submit` and batching enabled the anchor is enqueued and
    /// the call returns immediately, flushing opportunistically when a
    /// threshold is crossed; otherwise it is written straight through.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Unavailable`] on a direct write to a backend
    /// that is not ready, or whatever the backend write fails with.
    pub fn submit(&self, anchor: Anchor, async_submit: bool) -> Result<SubmitOutcome, LedgerError> {
        if async_submit && self.batch.config().enabled {
            let receipt = self.batch.enqueue(anchor);
            if self.batch.should_flush() {
                self.batch.flush();
            }
            return Ok(SubmitOutcome::Queued {
                queue_position: receipt.queue_position,
            });
        }

        if !self.backend.is_ready() {
            return Err(LedgerError::Unavailable {
                backend: self.backend.backend_type().to_string(),
            });
        }
        self.backend.submit_anchor(&anchor).map(SubmitOutcome::Stored)
    }

    /// Hashes raw content, builds an anchor around the digest, and submits
    /// it. The content itself is never stored or forwarded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on invalid anchor inputs or a failed
    /// submission.
    pub fn anchor_content(
        &self,
        anchor_type: AnchorType,
        source_id: impl Into<String>,
        content: &[u8],
        options: AnchorOptions,
        async_submit: bool,
    ) -> Result<SubmitOutcome, ClientError> {
        let data_hash = AnchorHasher::hash_bytes(content);
        let anchor = build_anchor(anchor_type, source_id, data_hash, options)?;
        Ok(self.submit(anchor, async_submit)?)
    }

    /// Like [`LedgerClient::anchor_content`], but for structured data:
    /// the value is canonicalized before hashing so semantically equal
    /// payloads anchor identically.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on invalid anchor inputs, content that
    /// cannot be canonicalized, or a failed submission.
    pub fn anchor_json(
        &self,
        anchor_type: AnchorType,
        source_id: impl Into<String>,
        content: &Value,
        options: AnchorOptions,
        async_submit: bool,
    ) -> Result<SubmitOutcome, ClientError> {
        let canonical = canonical::to_canonical_string(content)?;
        let data_hash = AnchorHasher::hash_str(&canonical);
        let anchor = build_anchor(anchor_type, source_id, data_hash, options)?;
        Ok(self.submit(anchor, async_submit)?)
    }

    /// Probes whether `anchor_hash` is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidDigest`] on a malformed hash.
    pub fn verify(&self, anchor_hash: &str) -> Result<VerifyOutcome, LedgerError> {
        self.backend.verify_anchor(anchor_hash)
    }

    /// Fetches the full stored record for `anchor_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidDigest`] on a malformed hash.
    pub fn get(&self, anchor_hash: &str) -> Result<Option<AnchorRecord>, LedgerError> {
        self.backend.get_anchor(anchor_hash)
    }

    /// Lists stored records newest-first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Persistence`] if stored state cannot be read.
    pub fn list(&self, query: &ListQuery) -> Result<Vec<AnchorRecord>, LedgerError> {
        self.backend.list_anchors(query)
    }

    /// Flushes the batch queue now.
    pub fn flush_batch(&self) -> FlushOutcome {
        self.batch.flush()
    }

    /// Operational snapshot.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            backend_type: self.backend.backend_type().to_string(),
            ready: self.backend.is_ready(),
            batching_enabled: self.batch.config().enabled,
            queued: self.batch.stats().queued,
        }
    }

    /// Combined backend and queue counters.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            backend: self.backend.stats(),
            batch: self.batch.stats(),
        }
    }
}

fn build_anchor(
    anchor_type: AnchorType,
    source_id: impl Into<String>,
    data_hash: String,
    options: AnchorOptions,
) -> Result<Anchor, ValidationError> {
    let mut builder = Anchor::builder(anchor_type, source_id, data_hash)
        .participants(options.participants)
        .metadata(options.metadata);

    if let Some(timestamp) = options.timestamp {
        builder = builder.timestamp(timestamp);
    }
    if let Some(reference) = options.previous_anchor_ref {
        builder = builder.previous_anchor_ref(reference);
    }

    builder.build()
}

#[cfg(test)]
mod unit_tests {
    use serde_json::json;

    use super::*;
    use crate::backend::SubmitStatus;

    #[test]
    fn test_direct_submit_and_verify() {
        let client = LedgerClient::in_memory();
        let anchor = Anchor::builder(
            AnchorType::Generic,
            "doc-1",
            AnchorHasher::hash_str("hello"),
        )
        .build()
        .unwrap();
        let hash = anchor.anchor_hash().to_string();

        let outcome = client.submit(anchor, false).unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::Stored(SubmitReceipt {
                status: SubmitStatus::Submitted,
                ..
            })
        ));
        assert!(client.verify(&hash).unwrap().exists);
    }

    #[test]
    fn test_async_submit_queues_until_flush() {
        let client = LedgerClient::in_memory();
        let anchor = Anchor::builder(
            AnchorType::Generic,
            "doc-1",
            AnchorHasher::hash_str("hello"),
        )
        .build()
        .unwrap();
        let hash = anchor.anchor_hash().to_string();

        let outcome = client.submit(anchor, true).unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued { queue_position: 1 });
        assert!(!client.verify(&hash).unwrap().exists);

        let flushed = client.flush_batch();
        assert_eq!(flushed.submitted, 1);
        assert!(client.verify(&hash).unwrap().exists);
    }

    #[test]
    fn test_async_submit_flushes_when_threshold_crossed() {
        let backend: Arc<dyn LedgerBackend> = Arc::new(InMemoryBackend::new());
        let client = LedgerClient::new(
            Arc::clone(&backend),
            BatchConfig {
                max_batch_size: 2,
                ..BatchConfig::default()
            },
        );

        for i in 0..2 {
            let anchor = Anchor::builder(
                AnchorType::Generic,
                format!("doc-{i}"),
                AnchorHasher::hash_str(&format!("doc-{i}")),
            )
            .build()
            .unwrap();
            client.submit(anchor, true).unwrap();
        }

        // The second enqueue crossed the threshold and flushed inline.
        assert_eq!(client.stats().backend.anchor_count, 2);
        assert_eq!(client.status().queued, 0);
    }

    #[test]
    fn test_anchor_content_hashes_internally() {
        let client = LedgerClient::in_memory();

        let outcome = client
            .anchor_content(
                AnchorType::Generic,
                "doc-1",
                b"hello",
                AnchorOptions::default(),
                false,
            )
            .unwrap();

        let SubmitOutcome::Stored(receipt) = outcome else {
            panic!("expected direct store");
        };
        let record = client.get(&receipt.anchor_hash).unwrap().unwrap();
        assert_eq!(record.data_hash, AnchorHasher::hash_str("hello"));
    }

    #[test]
    fn test_anchor_json_is_order_insensitive() {
        let client = LedgerClient::in_memory();
        let options = AnchorOptions::default();

        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();

        let first = client
            .anchor_json(AnchorType::Generic, "doc-1", &a, options.clone(), false)
            .unwrap();
        let SubmitOutcome::Stored(receipt) = first else {
            panic!("expected direct store");
        };
        let record = client.get(&receipt.anchor_hash).unwrap().unwrap();

        let canonical_hash = AnchorHasher::hash_str(r#"{"x":1,"y":2}"#);
        assert_eq!(record.data_hash, canonical_hash);

        // Same content, different key order, different source: same digest.
        let second = client
            .anchor_json(AnchorType::Generic, "doc-2", &b, options, false)
            .unwrap();
        let SubmitOutcome::Stored(receipt) = second else {
            panic!("expected direct store");
        };
        let record = client.get(&receipt.anchor_hash).unwrap().unwrap();
        assert_eq!(record.data_hash, canonical_hash);
    }

    #[test]
    fn test_anchor_content_propagates_validation_errors() {
        let client = LedgerClient::in_memory();
        let result = client.anchor_content(
            AnchorType::Generic,
            "  ",
            b"hello",
            AnchorOptions::default(),
            false,
        );
        assert!(matches!(
            result,
            Err(ClientError::Validation(ValidationError::EmptySourceId))
        ));
    }

    #[test]
    fn test_anchor_options_flow_through() {
        let client = LedgerClient::in_memory();
        let options = AnchorOptions {
            participants: vec!["alice".to_string(), "bob".to_string()],
            metadata: [("kind".to_string(), json!("session"))].into(),
            ..AnchorOptions::default()
        };

        let outcome = client
            .anchor_content(AnchorType::Meeting, "m-1", b"notes", options, false)
            .unwrap();
        let SubmitOutcome::Stored(receipt) = outcome else {
            panic!("expected direct store");
        };
        let record = client.get(&receipt.anchor_hash).unwrap().unwrap();
        assert_eq!(record.participants, ["alice", "bob"]);
        assert_eq!(record.metadata.get("kind"), Some(&json!("session")));
    }

    #[test]
    fn test_status_reports_backend_and_queue() {
        let client = LedgerClient::in_memory();
        let status = client.status();
        assert_eq!(status.backend_type, "memory");
        assert!(status.ready);
        assert!(status.batching_enabled);
        assert_eq!(status.queued, 0);
    }

    #[test]
    fn test_from_config_builds_file_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LedgerConfig {
            backend: BackendConfig::File {
                path: dir.path().join("ledger.json"),
                max_anchors: 10,
            },
            ..LedgerConfig::default()
        };

        let client = LedgerClient::from_config(&config);
        assert_eq!(client.status().backend_type, "file");
        assert_eq!(client.stats().backend.capacity, Some(10));
    }
}
