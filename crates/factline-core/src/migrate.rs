//! Backend-to-backend migration with completeness verification.
//!
//! The [`Migrator`] copies all records from a source backend into a
//! destination backend as trust requirements grow (in-memory → local file →
//! external tiers). It copies, never moves: the source stays intact until
//! the operator separately decommissions it.
//!
//! Three operator-invoked actions, no automatic transitions:
//! [`Migrator::dry_run`] estimates without writing, [`Migrator::migrate`]
//! copies batch by batch, and [`Migrator::verify`] draws a random sample
//! and reports a presence rate.
//!
//! Duplicate suppression during migration relies on the destination's own
//! idempotent `submit_anchor` (an `Exists` response), not on a separate
//! existence probe. The `skip_existing` pre-check is an early-skip
//! optimization only; a probe and a submit are separately-locked calls and
//! can never be the sole duplicate guard.

use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{AnchorRecord, LedgerBackend, LedgerError, SubmitStatus};

/// Upper bound on error messages retained in [`MigrationStats`].
pub const MAX_RECORDED_ERRORS: usize = 25;

/// Upper bound on missing hashes retained in a [`VerificationReport`].
pub const MAX_RECORDED_MISSING: usize = 25;

/// Hard migration failures.
///
/// Only source reads fail a run outright; there is nothing sensible to
/// report if the source cannot be read at all. Per-record failures are
/// accumulated into [`MigrationStats`] instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    /// The source backend could not be read.
    #[error("source backend read failed: {0}")]
    SourceRead(#[from] LedgerError),
}

/// Options for [`Migrator::migrate`].
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Records processed per batch.
    pub batch_size: usize,
    /// Probe the destination first and skip records it already has.
    pub skip_existing: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            skip_existing: true,
        }
    }
}

/// Read-only estimate of what a migration would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DryRunReport {
    /// Records in the source backend.
    pub total_in_source: usize,
    /// Records the destination already has.
    pub already_in_destination: usize,
    /// Records a migration would copy.
    pub would_migrate: usize,
}

/// Accumulated counts for a migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationStats {
    /// Records in the source backend.
    pub total: usize,
    /// Records copied into the destination.
    pub migrated: usize,
    /// Records skipped because the destination already had them.
    pub skipped: usize,
    /// Records that failed to copy.
    pub failed: usize,
    /// Batches processed so far.
    pub batches: usize,
    /// Messages for the first [`MAX_RECORDED_ERRORS`] failures.
    pub errors: Vec<String>,
}

impl MigrationStats {
    fn record_error(&mut self, message: String) {
        self.failed += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(message);
        }
    }
}

/// Result of a sampled completeness check.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Records actually sampled.
    pub sampled: usize,
    /// Sampled records present in the destination.
    pub verified: usize,
    /// Sampled records absent from the destination.
    pub missing: usize,
    /// Percentage of the sample present in the destination.
    pub verification_rate: f64,
    /// The first [`MAX_RECORDED_MISSING`] missing hashes, for diagnosis.
    pub missing_hashes: Vec<String>,
}

/// Progress callback invoked after every migrated batch.
///
/// The callback receives an immutable snapshot; it cannot corrupt the
/// in-flight stats.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(&MigrationStats);

/// Copies all records from one backend into another.
pub struct Migrator {
    source: Arc<dyn LedgerBackend>,
    destination: Arc<dyn LedgerBackend>,
}

impl Migrator {
    /// Creates a migrator between two backends.
    #[must_use]
    pub fn new(source: Arc<dyn LedgerBackend>, destination: Arc<dyn LedgerBackend>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Reads the entire source and probes the destination for each record,
    /// without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::SourceRead`] if the source cannot be read.
    pub fn dry_run(&self) -> Result<DryRunReport, MigrationError> {
        let records = self.source.export_all()?;
        let total_in_source = records.len();

        let already_in_destination = records
            .iter()
            .filter(|record| self.destination_has(&record.anchor_hash))
            .count();

        Ok(DryRunReport {
            total_in_source,
            already_in_destination,
            would_migrate: total_in_source - already_in_destination,
        })
    }

    /// Copies the source's records into the destination in fixed-size
    /// batches, invoking `progress` after every batch.
    ///
    /// Individual record failures are caught, recorded, and counted; they
    /// never abort the batch or the run.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::SourceRead`] if the source cannot be read.
    pub fn migrate(
        &self,
        options: &MigrateOptions,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> Result<MigrationStats, MigrationError> {
        let records = self.source.export_all()?;
        let batch_size = options.batch_size.max(1);

        let mut stats = MigrationStats {
            total: records.len(),
            ..MigrationStats::default()
        };

        for batch in records.chunks(batch_size) {
            for record in batch {
                self.migrate_record(record, options.skip_existing, &mut stats);
            }
            stats.batches += 1;
            debug!(
                batch = stats.batches,
                migrated = stats.migrated,
                skipped = stats.skipped,
                failed = stats.failed,
                "migration batch complete"
            );
            if let Some(callback) = progress.as_mut() {
                callback(&stats);
            }
        }

        if stats.failed > 0 {
            warn!(
                failed = stats.failed,
                total = stats.total,
                "migration finished with failures"
            );
        }
        Ok(stats)
    }

    /// Draws a random sample from the source and confirms presence in the
    /// destination.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::SourceRead`] if the source cannot be read.
    pub fn verify(&self, sample_size: usize) -> Result<VerificationReport, MigrationError> {
        let records = self.source.export_all()?;
        let sample: Vec<&AnchorRecord> = records
            .choose_multiple(&mut rand::thread_rng(), sample_size.min(records.len()))
            .collect();

        let mut verified = 0;
        let mut missing_hashes = Vec::new();
        let mut missing = 0;

        for record in &sample {
            if self.destination_has(&record.anchor_hash) {
                verified += 1;
            } else {
                missing += 1;
                if missing_hashes.len() < MAX_RECORDED_MISSING {
                    missing_hashes.push(record.anchor_hash.clone());
                }
            }
        }

        let sampled = sample.len();
        let verification_rate = if sampled == 0 {
            100.0
        } else {
            (verified as f64 / sampled as f64) * 100.0
        };

        Ok(VerificationReport {
            sampled,
            verified,
            missing,
            verification_rate,
            missing_hashes,
        })
    }

    fn migrate_record(&self, record: &AnchorRecord, skip_existing: bool, stats: &mut MigrationStats) {
        // Early-skip optimization only; the submit below is the actual
        // duplicate guard.
        if skip_existing && self.destination_has(&record.anchor_hash) {
            stats.skipped += 1;
            return;
        }

        let anchor = match record.to_anchor() {
            Ok(anchor) => anchor,
            Err(error) => {
                stats.record_error(format!("{}: rebuild failed: {error}", record.anchor_hash));
                return;
            }
        };

        // A record whose fields no longer reproduce its stored hash was
        // corrupted in the source; copying it would launder the corruption.
        if anchor.anchor_hash() != record.anchor_hash {
            stats.record_error(format!(
                "{}: stored fields hash to {}",
                record.anchor_hash,
                anchor.anchor_hash()
            ));
            return;
        }

        match self.destination.submit_anchor(&anchor) {
            Ok(receipt) if receipt.status == SubmitStatus::Submitted => stats.migrated += 1,
            Ok(_) => stats.skipped += 1,
            Err(error) => {
                stats.record_error(format!("{}: {error}", record.anchor_hash));
            }
        }
    }

    /// Destination probe that treats probe failures as "absent": the probe
    /// is advisory, and a submit will settle the question.
    fn destination_has(&self, anchor_hash: &str) -> bool {
        self.destination
            .verify_anchor(anchor_hash)
            .map(|outcome| outcome.exists)
            .unwrap_or(false)
    }
}
