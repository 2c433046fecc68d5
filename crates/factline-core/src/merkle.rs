//! Merkle batching over hex-encoded SHA-256 leaves.
//!
//! A [`MerkleTree`] summarizes an ordered batch of items in a single root
//! hash and produces compact inclusion proofs. Leaves are the SHA-256 hex
//! digests of the input items; parents hash the concatenation of their
//! children's hex digests.
//!
//! When a level has an odd number of nodes, the last node is **duplicated**
//! and paired with itself. Stored roots were computed under this rule, so
//! any scheme that promotes the odd node instead would produce incompatible
//! roots. Both sides of a proof must agree on duplication.

use serde::{Deserialize, Serialize};

use crate::crypto::AnchorHasher;

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Sibling is hashed before the running value.
    Left,
    /// Sibling is hashed after the running value.
    Right,
}

/// One step of an inclusion proof: a sibling digest and its side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// The sibling node's hex digest.
    pub sibling_hash: String,
    /// Which side the sibling combines on.
    pub position: Position,
}

/// A SHA-256 Merkle tree over an ordered batch of string items.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All levels, bottom-up. `levels[0]` holds the leaf digests.
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    /// Builds a tree from an ordered batch of items.
    ///
    /// Each item is hashed to form a leaf; levels are then reduced pairwise
    /// until a single root remains, duplicating the odd tail node.
    #[must_use]
    pub fn build<S: AsRef<str>>(items: &[S]) -> Self {
        let leaves: Vec<String> = items
            .iter()
            .map(|item| AnchorHasher::hash_str(item.as_ref()))
            .collect();
        Self::from_leaves(leaves)
    }

    /// Builds a tree from pre-computed leaf digests.
    #[must_use]
    pub fn from_leaves(leaves: Vec<String>) -> Self {
        let mut levels = vec![leaves];

        while levels.last().map_or(0, Vec::len) > 1 {
            let current = levels.last().expect("levels is never empty");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for pair in current.chunks(2) {
                let left = &pair[0];
                // Odd tail: duplicate, never promote.
                let right = pair.get(1).unwrap_or(left);
                next.push(AnchorHasher::hash_pair(left, right));
            }

            levels.push(next);
        }

        Self { levels }
    }

    /// The root digest; the empty string for an empty tree.
    #[must_use]
    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// The leaf digests, in input order.
    #[must_use]
    pub fn leaves(&self) -> &[String] {
        self.levels.first().map_or(&[], Vec::as_slice)
    }

    /// Builds an inclusion proof for `item`, or `None` if absent.
    ///
    /// When the same item appears more than once, the proof targets its
    /// first occurrence.
    #[must_use]
    pub fn proof(&self, item: &str) -> Option<Vec<ProofStep>> {
        let leaf = AnchorHasher::hash_str(item);
        let index = self.leaves().iter().position(|l| *l == leaf)?;
        Some(self.proof_at(index))
    }

    /// Builds an inclusion proof for the leaf at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn proof_at(&self, index: usize) -> Vec<ProofStep> {
        assert!(index < self.leaf_count(), "leaf index out of bounds");

        let mut steps = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            // The odd tail pairs with a duplicate of itself.
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
            let position = if idx % 2 == 0 {
                Position::Right
            } else {
                Position::Left
            };
            steps.push(ProofStep {
                sibling_hash: sibling.clone(),
                position,
            });
            idx /= 2;
        }

        steps
    }
}

/// Verifies an inclusion proof for `item` against a known root.
///
/// Replays the combine order: at each step the running digest is hashed
/// with the sibling on the recorded side, and the final digest must equal
/// the root.
#[must_use]
pub fn verify_proof(root: &str, item: &str, proof: &[ProofStep]) -> bool {
    let mut current = AnchorHasher::hash_str(item);

    for step in proof {
        current = match step.position {
            Position::Left => AnchorHasher::hash_pair(&step.sibling_hash, &current),
            Position::Right => AnchorHasher::hash_pair(&current, &step.sibling_hash),
        };
    }

    current == root
}
