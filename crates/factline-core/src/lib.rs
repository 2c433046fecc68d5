//! Core library for the factline anchor ledger.
//!
//! factline is an append-only, tamper-evident record ledger: a store of
//! immutable, hash-linked "anchor" records that lets independent callers
//! commit small proofs of facts (a session happened, a message was relayed,
//! a declaration was made) without exposing the underlying content. Only a
//! content hash is ever stored.
//!
//! # Architecture
//!
//! ```text
//! +--------+    +--------------+    +----------------+
//! | Caller | -> | LedgerClient | -> | BatchProcessor |
//! +--------+    +--------------+    +----------------+
//!                      |                    |
//!                      v                    v
//!               +---------------------------------+
//!               | LedgerBackend (trait)           |
//!               |  - InMemoryBackend (volatile)   |
//!               |  - FileBackend (durable JSON)   |
//!               |  - ChainBackend (Merkle blocks) |
//!               +---------------------------------+
//! ```
//!
//! Callers build an [`Anchor`] (or hand raw content to
//! [`LedgerClient::anchor_content`]), submit it through the client, and later
//! verify, fetch, or list records against the same client. The [`Migrator`]
//! copies all records from one backend into another with dry-run estimation
//! and sampled verification.
//!
//! # Integrity guarantees
//!
//! - Deterministic hashing: anchors with identical field values always
//!   produce identical hashes, independent of field insertion order.
//! - Idempotent submission: the same anchor submitted twice is stored once;
//!   the second submission observes `Exists`.
//! - Hash-chain verification: [`chain::Chain`] links Merkle-rooted blocks
//!   and detects any mutation of stored block fields.
//! - Crash-safe persistence: every durable mutation is a full-document
//!   write to a temporary file followed by an atomic rename.

pub mod anchor;
pub mod backend;
pub mod batch;
pub mod canonical;
pub mod chain;
pub mod client;
pub mod config;
pub mod crypto;
pub mod merkle;
pub mod migrate;

mod persist;

pub use anchor::{Anchor, AnchorBuilder, AnchorType, ValidationError};
pub use backend::{
    AnchorRecord, BackendStats, BatchSubmitResult, ChainBackend, FileBackend, InMemoryBackend,
    LedgerBackend, LedgerError, ListQuery, SubmitReceipt, SubmitStatus, VerifyOutcome,
};
pub use batch::{BatchConfig, BatchProcessor, FlushOutcome};
pub use client::{AnchorOptions, ClientError, LedgerClient, SubmitOutcome};
pub use config::{BackendConfig, BatchSettings, ConfigError, LedgerConfig};
pub use merkle::MerkleTree;
pub use migrate::{DryRunReport, MigrateOptions, MigrationStats, Migrator, VerificationReport};
