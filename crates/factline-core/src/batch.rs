//! Write batching for anchor submissions.
//!
//! The [`BatchProcessor`] buffers anchors in memory and flushes them to a
//! backend either on demand or when a size or time threshold is crossed.
//! Enqueueing never blocks on I/O, so slow backend writes never stall a hot
//! caller path. A failed flush re-queues the un-submitted anchors at the
//! front of the queue rather than losing them: flush failure is
//! recoverable, not fatal.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::anchor::Anchor;
use crate::backend::LedgerBackend;

/// Default maximum queue length before a flush is due.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default interval after which a non-empty queue is due for a flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Batching policy.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// When false, batching is off and every queue check says "flush now".
    pub enabled: bool,
    /// Queue length at which a flush becomes due.
    pub max_batch_size: usize,
    /// Elapsed time since the last flush at which a flush becomes due.
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Receipt for an enqueued anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    /// One-based position in the queue at enqueue time.
    pub queue_position: usize,
}

/// Outcome of one flush attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Anchors the flush attempted to submit.
    pub attempted: usize,
    /// Anchors newly stored by the backend.
    pub submitted: usize,
    /// Anchors the backend already had.
    pub exists: usize,
    /// Anchors that failed with a per-item error.
    pub failed: usize,
    /// Anchors returned to the front of the queue after a transport
    /// failure.
    pub requeued: usize,
}

/// Queue introspection counters.
#[derive(Debug, Clone, Copy)]
pub struct BatchStats {
    /// Whether batching is enabled.
    pub enabled: bool,
    /// Anchors currently queued.
    pub queued: usize,
    /// Completed flush attempts.
    pub flushes: u64,
    /// Anchors handed to the backend across all flushes.
    pub flushed_total: u64,
    /// Time since the last flush attempt.
    pub since_last_flush: Duration,
}

#[derive(Debug)]
struct QueueState {
    queue: Vec<Anchor>,
    last_flush: Instant,
    flushes: u64,
    flushed_total: u64,
}

/// Buffers anchors and flushes them to a backend by size or time policy.
pub struct BatchProcessor {
    config: BatchConfig,
    backend: Arc<dyn LedgerBackend>,
    state: Mutex<QueueState>,
}

impl BatchProcessor {
    /// Creates a processor flushing into `backend` under `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn LedgerBackend>, config: BatchConfig) -> Self {
        Self {
            config,
            backend,
            state: Mutex::new(QueueState {
                queue: Vec::new(),
                last_flush: Instant::now(),
                flushes: 0,
                flushed_total: 0,
            }),
        }
    }

    /// The active batching policy.
    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Appends an anchor to the queue and returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    pub fn enqueue(&self, anchor: Anchor) -> EnqueueReceipt {
        let mut state = self.state.lock().expect("lock poisoned");
        state.queue.push(anchor);
        EnqueueReceipt {
            queue_position: state.queue.len(),
        }
    }

    /// Whether a flush is due: batching disabled, size threshold reached,
    /// or flush interval elapsed. An empty queue is never due.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn should_flush(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        if state.queue.is_empty() {
            return false;
        }
        if !self.config.enabled {
            return true;
        }
        state.queue.len() >= self.config.max_batch_size
            || state.last_flush.elapsed() >= self.config.flush_interval
    }

    /// Flushes the current queue to the backend.
    ///
    /// The queue is atomically swapped out before submission, so anchors
    /// enqueued during the flush land in the next batch. On a transport
    /// failure the whole batch is re-queued at the front, ahead of anything
    /// enqueued meanwhile.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    pub fn flush(&self) -> FlushOutcome {
        let batch = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.last_flush = Instant::now();
            if state.queue.is_empty() {
                return FlushOutcome::default();
            }
            state.flushes += 1;
            std::mem::take(&mut state.queue)
        };

        let attempted = batch.len();

        // Submission happens outside the lock: enqueueing stays non-blocking
        // while the backend writes.
        match self.backend.submit_anchors(&batch) {
            Ok(result) => {
                let mut state = self.state.lock().expect("lock poisoned");
                state.flushed_total += attempted as u64;
                debug!(
                    attempted,
                    submitted = result.submitted,
                    exists = result.exists,
                    failed = result.failed,
                    "flushed anchor batch"
                );
                FlushOutcome {
                    attempted,
                    submitted: result.submitted,
                    exists: result.exists,
                    failed: result.failed,
                    requeued: 0,
                }
            }
            Err(error) => {
                warn!(%error, attempted, "flush failed, re-queueing batch");
                let mut state = self.state.lock().expect("lock poisoned");
                let newer = std::mem::take(&mut state.queue);
                state.queue = batch;
                state.queue.extend(newer);
                FlushOutcome {
                    attempted,
                    requeued: attempted,
                    ..FlushOutcome::default()
                }
            }
        }
    }

    /// Clones up to `limit` anchors from the front of the queue.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn peek(&self, limit: usize) -> Vec<Anchor> {
        let state = self.state.lock().expect("lock poisoned");
        state.queue.iter().take(limit).cloned().collect()
    }

    /// Queue counters.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        let state = self.state.lock().expect("lock poisoned");
        BatchStats {
            enabled: self.config.enabled,
            queued: state.queue.len(),
            flushes: state.flushes,
            flushed_total: state.flushed_total,
            since_last_flush: state.last_flush.elapsed(),
        }
    }

    /// Drops all queued anchors, returning how many were discarded.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock().expect("lock poisoned");
        let dropped = state.queue.len();
        state.queue.clear();
        dropped
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::anchor::AnchorType;
    use crate::backend::{InMemoryBackend, LedgerError, SubmitReceipt};
    use crate::crypto::AnchorHasher;

    fn sample_anchor(source_id: &str) -> Anchor {
        Anchor::builder(
            AnchorType::Generic,
            source_id,
            AnchorHasher::hash_str(source_id),
        )
        .build()
        .unwrap()
    }

    fn processor(config: BatchConfig) -> (BatchProcessor, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        (
            BatchProcessor::new(backend.clone(), config),
            backend,
        )
    }

    #[test]
    fn test_enqueue_reports_position() {
        let (processor, _backend) = processor(BatchConfig::default());
        assert_eq!(processor.enqueue(sample_anchor("a")).queue_position, 1);
        assert_eq!(processor.enqueue(sample_anchor("b")).queue_position, 2);
    }

    #[test]
    fn test_empty_queue_never_due() {
        let (processor, _backend) = processor(BatchConfig {
            enabled: false,
            ..BatchConfig::default()
        });
        assert!(!processor.should_flush());
    }

    #[test]
    fn test_disabled_batching_always_due() {
        let (processor, _backend) = processor(BatchConfig {
            enabled: false,
            ..BatchConfig::default()
        });
        processor.enqueue(sample_anchor("a"));
        assert!(processor.should_flush());
    }

    #[test]
    fn test_size_threshold() {
        let (processor, _backend) = processor(BatchConfig {
            max_batch_size: 2,
            ..BatchConfig::default()
        });
        processor.enqueue(sample_anchor("a"));
        assert!(!processor.should_flush());
        processor.enqueue(sample_anchor("b"));
        assert!(processor.should_flush());
    }

    #[test]
    fn test_time_threshold() {
        let (processor, _backend) = processor(BatchConfig {
            flush_interval: Duration::from_millis(0),
            ..BatchConfig::default()
        });
        processor.enqueue(sample_anchor("a"));
        assert!(processor.should_flush());
    }

    #[test]
    fn test_flush_submits_and_empties_queue() {
        let (processor, backend) = processor(BatchConfig::default());
        processor.enqueue(sample_anchor("a"));
        processor.enqueue(sample_anchor("b"));

        let outcome = processor.flush();
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.submitted, 2);
        assert_eq!(outcome.requeued, 0);
        assert_eq!(backend.len(), 2);
        assert_eq!(processor.stats().queued, 0);
    }

    #[test]
    fn test_flush_counts_duplicates_as_exists() {
        let (processor, backend) = processor(BatchConfig::default());
        let anchor = sample_anchor("dup");
        backend.submit_anchor(&anchor).unwrap();

        processor.enqueue(anchor);
        let outcome = processor.flush();
        assert_eq!(outcome.exists, 1);
        assert_eq!(outcome.submitted, 0);
    }

    #[test]
    fn test_flush_empty_queue_is_noop() {
        let (processor, _backend) = processor(BatchConfig::default());
        let outcome = processor.flush();
        assert_eq!(outcome, FlushOutcome::default());
        assert_eq!(processor.stats().flushes, 0);
    }

    /// A backend that refuses every write, for re-queue tests.
    struct DownBackend;

    impl LedgerBackend for DownBackend {
        fn submit_anchor(&self, _anchor: &Anchor) -> Result<SubmitReceipt, LedgerError> {
            Err(LedgerError::Unavailable {
                backend: "down".to_string(),
            })
        }

        fn verify_anchor(
            &self,
            _anchor_hash: &str,
        ) -> Result<crate::backend::VerifyOutcome, LedgerError> {
            Err(LedgerError::Unavailable {
                backend: "down".to_string(),
            })
        }

        fn get_anchor(
            &self,
            _anchor_hash: &str,
        ) -> Result<Option<crate::backend::AnchorRecord>, LedgerError> {
            Err(LedgerError::Unavailable {
                backend: "down".to_string(),
            })
        }

        fn list_anchors(
            &self,
            _query: &crate::backend::ListQuery,
        ) -> Result<Vec<crate::backend::AnchorRecord>, LedgerError> {
            Err(LedgerError::Unavailable {
                backend: "down".to_string(),
            })
        }

        fn backend_type(&self) -> &'static str {
            "down"
        }

        fn is_ready(&self) -> bool {
            false
        }

        fn stats(&self) -> crate::backend::BackendStats {
            crate::backend::BackendStats::default()
        }
    }

    #[test]
    fn test_failed_flush_requeues_at_front() {
        let processor = BatchProcessor::new(Arc::new(DownBackend), BatchConfig::default());
        processor.enqueue(sample_anchor("first"));
        processor.enqueue(sample_anchor("second"));

        let outcome = processor.flush();
        assert_eq!(outcome.requeued, 2);
        assert_eq!(outcome.submitted, 0);

        // Nothing was lost and order is preserved.
        let peeked = processor.peek(10);
        assert_eq!(peeked.len(), 2);
        assert_eq!(peeked[0].source_id(), "first");
        assert_eq!(peeked[1].source_id(), "second");
    }

    #[test]
    fn test_clear_drops_queue() {
        let (processor, _backend) = processor(BatchConfig::default());
        processor.enqueue(sample_anchor("a"));
        processor.enqueue(sample_anchor("b"));

        assert_eq!(processor.clear(), 2);
        assert_eq!(processor.stats().queued, 0);
    }

    #[test]
    fn test_stats_track_flushes() {
        let (processor, _backend) = processor(BatchConfig::default());
        processor.enqueue(sample_anchor("a"));
        processor.flush();

        let stats = processor.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.flushed_total, 1);
        assert!(stats.enabled);
    }
}
