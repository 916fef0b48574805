//! Binary Merkle tree over 32-byte leaves (bunch mega roots).
//!
//! Leaf count must be an exact power of two; nothing is padded. Parents are
//! `keccak256(left ++ right)` with left/right fixed by the original leaf index.
//! A single leaf is its own root (depth 0).

use thiserror::Error;

use crate::keccak;
use crate::types::Hash256;

/// Deepest bunch accepted anywhere in the relay (2^32 blocks).
pub const MAX_BUNCH_DEPTH: u8 = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("no leaves")]
    Empty,

    #[error("leaf count {0} is not a power of two")]
    NotPowerOfTwo(usize),

    #[error("tree depth {depth} exceeds maximum {max}")]
    TooDeep { depth: usize, max: u8 },

    #[error("leaf index {index} out of range for depth {depth}")]
    IndexOutOfRange { index: u64, depth: usize },

    #[error("root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },
}

/// `keccak256(left ++ right)`.
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    keccak(buf)
}

/// Depth of a tree with `leaf_count` leaves.
pub fn depth_for_leaf_count(leaf_count: usize) -> Result<u8, MerkleError> {
    if leaf_count == 0 {
        return Err(MerkleError::Empty);
    }
    if !leaf_count.is_power_of_two() {
        return Err(MerkleError::NotPowerOfTwo(leaf_count));
    }
    let depth = leaf_count.trailing_zeros();
    u8::try_from(depth)
        .ok()
        .filter(|d| *d <= MAX_BUNCH_DEPTH)
        .ok_or(MerkleError::TooDeep {
            depth: depth as usize,
            max: MAX_BUNCH_DEPTH,
        })
}

/// Fold `leaves` pairwise, bottom-up, into a single root.
pub fn build_merkle_root(leaves: &[Hash256]) -> Result<Hash256, MerkleError> {
    depth_for_leaf_count(leaves.len())?;

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    Ok(level[0])
}

/// Sibling path for `leaves[index]`, bottom level first.
///
/// The path has exactly `log2(leaves.len())` entries and is the input
/// [`verify_bunch_inclusion`] expects.
pub fn build_inclusion_path(leaves: &[Hash256], index: usize) -> Result<Vec<Hash256>, MerkleError> {
    let depth = usize::from(depth_for_leaf_count(leaves.len())?);
    if index >= leaves.len() {
        return Err(MerkleError::IndexOutOfRange {
            index: index as u64,
            depth,
        });
    }

    let mut siblings = Vec::with_capacity(depth);
    let mut level = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        siblings.push(level[idx ^ 1]);
        level = level
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
        idx /= 2;
    }
    Ok(siblings)
}

/// Recompute the root from a leaf, its index and its sibling path.
///
/// At each level an even index means the running hash is the left child.
pub fn compute_root_from_path(
    leaf: &Hash256,
    index: u64,
    siblings: &[Hash256],
) -> Result<Hash256, MerkleError> {
    let depth = siblings.len();
    if depth > usize::from(MAX_BUNCH_DEPTH) {
        return Err(MerkleError::TooDeep {
            depth,
            max: MAX_BUNCH_DEPTH,
        });
    }
    // depth <= 32 so the shift cannot overflow.
    if index >= (1u64 << depth) {
        return Err(MerkleError::IndexOutOfRange { index, depth });
    }

    let mut node = *leaf;
    let mut idx = index;
    for sibling in siblings {
        node = if idx & 1 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
        idx >>= 1;
    }
    Ok(node)
}

/// Check that `leaf` sits at `index` under `expected_root`.
pub fn verify_bunch_inclusion(
    leaf: &Hash256,
    index: u64,
    siblings: &[Hash256],
    expected_root: &Hash256,
) -> Result<(), MerkleError> {
    let computed = compute_root_from_path(leaf, index, siblings)?;
    if &computed != expected_root {
        return Err(MerkleError::RootMismatch {
            expected: hex::encode(expected_root),
            computed: hex::encode(computed),
        });
    }
    Ok(())
}
