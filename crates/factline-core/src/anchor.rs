//! Immutable anchor records.
//!
//! An [`Anchor`] proves that a fact occurred without revealing its content:
//! it carries a content hash, never the content itself. Anchors are hashed
//! over a canonical payload at construction and never mutated afterwards;
//! equality and map keys are defined purely by that hash.
//!
//! Validation happens at construction. A malformed anchor type, data hash,
//! or source id fails [`AnchorBuilder::build`] with a [`ValidationError`];
//! nothing is silently coerced.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

use crate::canonical::{self, CanonicalError};
use crate::crypto::{AnchorHasher, HashError, normalize_digest};

/// Prefix for caller-namespaced anchor types outside the fixed vocabulary.
pub const CUSTOM_PREFIX: &str = "custom.";

/// Errors raised when constructing an anchor from malformed inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// The anchor type is neither in the fixed vocabulary nor
    /// `custom.`-prefixed.
    #[error("unknown anchor type '{value}': not in the fixed vocabulary and not 'custom.'-prefixed")]
    InvalidAnchorType {
        /// The rejected type tag.
        value: String,
    },

    /// The data hash is not a 64-hex SHA-256 digest.
    #[error("invalid data hash: {0}")]
    InvalidDataHash(#[from] HashError),

    /// The source id is empty or whitespace-only.
    #[error("source id must not be blank")]
    EmptySourceId,

    /// Metadata nests deeper than the canonicalizer allows.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] CanonicalError),
}

/// The type tag of an anchor.
///
/// Either one of the fixed vocabulary entries or a caller-namespaced
/// `custom.`-prefixed tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnchorType {
    /// A meeting or session between agents took place.
    Meeting,
    /// A generic fact with no more specific vocabulary entry.
    Generic,
    /// An audit trail entry.
    Audit,
    /// A release or publication event.
    Release,
    /// An agent's declaration of principles.
    PhilosophyDeclaration,
    /// An observation log entry.
    ObservationLog,
    /// A caller-namespaced tag, stored with its `custom.` prefix.
    Custom(String),
}

impl AnchorType {
    /// The full string tag, including the `custom.` prefix for custom types.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Meeting => "meeting",
            Self::Generic => "generic",
            Self::Audit => "audit",
            Self::Release => "release",
            Self::PhilosophyDeclaration => "philosophy_declaration",
            Self::ObservationLog => "observation_log",
            Self::Custom(tag) => tag,
        }
    }

    /// Parses a type tag.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAnchorType`] if the tag is neither
    /// in the fixed vocabulary nor `custom.`-prefixed.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "meeting" => Ok(Self::Meeting),
            "generic" => Ok(Self::Generic),
            "audit" => Ok(Self::Audit),
            "release" => Ok(Self::Release),
            "philosophy_declaration" => Ok(Self::PhilosophyDeclaration),
            "observation_log" => Ok(Self::ObservationLog),
            other if other.len() > CUSTOM_PREFIX.len() && other.starts_with(CUSTOM_PREFIX) => {
                Ok(Self::Custom(other.to_string()))
            }
            other => Err(ValidationError::InvalidAnchorType {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AnchorType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AnchorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for AnchorType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Self::parse(&tag).map_err(D::Error::custom)
    }
}

/// An immutable, hash-identified record proving a fact occurred.
///
/// Constructed via [`Anchor::builder`]; the anchor hash is computed once at
/// construction and cached. Two anchors with identical field values always
/// produce identical hashes, independent of participant or metadata
/// insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    anchor_type: AnchorType,
    source_id: String,
    data_hash: String,
    participants: Vec<String>,
    metadata: BTreeMap<String, Value>,
    timestamp: DateTime<Utc>,
    previous_anchor_ref: Option<String>,
    anchor_hash: String,
}

impl Anchor {
    /// Starts building an anchor.
    #[must_use]
    pub fn builder(
        anchor_type: AnchorType,
        source_id: impl Into<String>,
        data_hash: impl Into<String>,
    ) -> AnchorBuilder {
        AnchorBuilder {
            anchor_type,
            source_id: source_id.into(),
            data_hash: data_hash.into(),
            participants: Vec::new(),
            metadata: BTreeMap::new(),
            timestamp: None,
            previous_anchor_ref: None,
        }
    }

    /// The anchor's type tag.
    #[must_use]
    pub fn anchor_type(&self) -> &AnchorType {
        &self.anchor_type
    }

    /// The caller-supplied identifier of the thing being anchored.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The normalized 64-hex SHA-256 digest of the anchored content.
    #[must_use]
    pub fn data_hash(&self) -> &str {
        &self.data_hash
    }

    /// Participant identifiers, deduplicated, original casing preserved.
    #[must_use]
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// Free-form metadata, key-sorted.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Creation instant (UTC).
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Optional back-reference to a logically prior anchor.
    #[must_use]
    pub fn previous_anchor_ref(&self) -> Option<&str> {
        self.previous_anchor_ref.as_deref()
    }

    /// The cached canonical hash identifying this anchor.
    #[must_use]
    pub fn anchor_hash(&self) -> &str {
        &self.anchor_hash
    }

    /// Recomputes the hash from current fields and compares it to the
    /// cached value.
    ///
    /// Consumers that deserialized an anchor use this to confirm it was not
    /// corrupted in transit.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        compute_anchor_hash(
            &self.anchor_type,
            &self.source_id,
            &self.data_hash,
            &self.participants,
            &self.metadata,
            self.timestamp,
            self.previous_anchor_ref.as_deref(),
        )
        .is_ok_and(|hash| hash == self.anchor_hash)
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.anchor_hash == other.anchor_hash
    }
}

impl Eq for Anchor {}

impl Hash for Anchor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.anchor_hash.hash(state);
    }
}

/// Builder for [`Anchor`]; validation happens in [`AnchorBuilder::build`].
#[derive(Debug, Clone)]
pub struct AnchorBuilder {
    anchor_type: AnchorType,
    source_id: String,
    data_hash: String,
    participants: Vec<String>,
    metadata: BTreeMap<String, Value>,
    timestamp: Option<DateTime<Utc>>,
    previous_anchor_ref: Option<String>,
}

impl AnchorBuilder {
    /// Adds a single participant identifier.
    #[must_use]
    pub fn participant(mut self, id: impl Into<String>) -> Self {
        self.participants.push(id.into());
        self
    }

    /// Adds participant identifiers.
    #[must_use]
    pub fn participants<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replaces the metadata map.
    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Overrides the timestamp; defaults to the construction instant.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Links this anchor to a logically prior one.
    #[must_use]
    pub fn previous_anchor_ref(mut self, reference: impl Into<String>) -> Self {
        self.previous_anchor_ref = Some(reference.into());
        self
    }

    /// Validates the inputs and builds the anchor.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on a malformed anchor type, data hash,
    /// or source id.
    pub fn build(self) -> Result<Anchor, ValidationError> {
        // Custom tags built directly (not via parse) are validated here.
        if let AnchorType::Custom(tag) = &self.anchor_type {
            if tag.len() <= CUSTOM_PREFIX.len() || !tag.starts_with(CUSTOM_PREFIX) {
                return Err(ValidationError::InvalidAnchorType { value: tag.clone() });
            }
        }

        if self.source_id.trim().is_empty() {
            return Err(ValidationError::EmptySourceId);
        }

        let data_hash = normalize_digest(&self.data_hash)?;
        let participants = dedup_participants(self.participants);
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);

        let anchor_hash = compute_anchor_hash(
            &self.anchor_type,
            &self.source_id,
            &data_hash,
            &participants,
            &self.metadata,
            timestamp,
            self.previous_anchor_ref.as_deref(),
        )?;

        Ok(Anchor {
            anchor_type: self.anchor_type,
            source_id: self.source_id,
            data_hash,
            participants,
            metadata: self.metadata,
            timestamp,
            previous_anchor_ref: self.previous_anchor_ref,
            anchor_hash,
        })
    }
}

/// Deduplicates participants case-insensitively, keeping the first
/// occurrence's casing for display.
fn dedup_participants(participants: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    participants
        .into_iter()
        .filter(|p| seen.insert(p.to_lowercase()))
        .collect()
}

/// Computes the canonical hash over an anchor's fields.
///
/// Participants are sorted and lower-cased, metadata keys are sorted, and
/// the timestamp is rendered with fixed microsecond precision so the hash
/// is independent of insertion order and formatting drift.
fn compute_anchor_hash(
    anchor_type: &AnchorType,
    source_id: &str,
    data_hash: &str,
    participants: &[String],
    metadata: &BTreeMap<String, Value>,
    timestamp: DateTime<Utc>,
    previous_anchor_ref: Option<&str>,
) -> Result<String, CanonicalError> {
    let mut hashed_participants: Vec<String> =
        participants.iter().map(|p| p.to_lowercase()).collect();
    hashed_participants.sort_unstable();

    let payload = json!({
        "anchor_type": anchor_type.tag(),
        "source_id": source_id,
        "data_hash": data_hash,
        "participants": hashed_participants,
        "metadata": metadata,
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "previous_anchor_ref": previous_anchor_ref,
    });

    let canonical = canonical::to_canonical_string(&payload)?;
    Ok(AnchorHasher::hash_str(&canonical))
}
