//! Aggregate roots over the member list.
//!
//! The store only needs "the root of these members at this depth"; the tree
//! itself belongs to whatever proof system consumes the group. That system's
//! hash goes behind [`RootFunction`]. [`Sha256MerkleRoot`] is the reference
//! implementation used by default and in tests.
use sha2::{Digest, Sha256};

use crate::{error::ValidationError, group::Commitment, util::decimal};

/// Depths above this would make `2^depth` overflow a `u64` capacity.
pub const MAX_TREE_DEPTH: u8 = 32;

pub trait RootFunction: Send + Sync {
    /// Root of `members`, in order, in a tree of fixed `depth`, as a decimal string.
    ///
    /// Fails with [`ValidationError::TreeFull`] when the members do not fit.
    fn compute_root(&self, members: &[Commitment], depth: u8) -> Result<String, ValidationError>;
}

pub fn capacity(depth: u8) -> Result<u64, ValidationError> {
    if depth == 0 || depth > MAX_TREE_DEPTH {
        return Err(ValidationError::UnsupportedDepth(depth));
    }

    Ok(1u64 << depth)
}

/// A fixed-depth binary Merkle tree over SHA-256, padded with empty leaves.
///
/// ```text
/// leaf  = SHA256(0x00 || decimal commitment)
/// node  = SHA256(0x01 || left || right)
/// empty = 32 zero bytes, and empty(d + 1) = node(empty(d), empty(d))
/// ```
///
/// Only the occupied prefix of every level is hashed; the rest is covered by
/// the precomputed empty-subtree hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256MerkleRoot;

type Digest32 = [u8; 32];

fn leaf_hash(member: &Commitment) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update([0x00u8]);
    hasher.update(member.as_str().as_bytes());
    hasher.finalize().into()
}

fn node_hash(left: &Digest32, right: &Digest32) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update([0x01u8]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn empty_subtrees(depth: u8) -> Vec<Digest32> {
    let mut empty = Vec::with_capacity(usize::from(depth) + 1);
    empty.push([0u8; 32]);

    for level in 0..usize::from(depth) {
        empty.push(node_hash(&empty[level], &empty[level]));
    }

    empty
}

impl Sha256MerkleRoot {
    /// The root of a tree with no members.
    pub fn empty_root(depth: u8) -> Result<String, ValidationError> {
        capacity(depth)?;

        Ok(decimal::be_bytes_to_decimal(
            &empty_subtrees(depth)[usize::from(depth)],
        ))
    }
}

impl RootFunction for Sha256MerkleRoot {
    fn compute_root(&self, members: &[Commitment], depth: u8) -> Result<String, ValidationError> {
        let capacity = capacity(depth)?;
        if members.len() as u64 > capacity {
            return Err(ValidationError::TreeFull { capacity });
        }

        let empty = empty_subtrees(depth);
        let mut level: Vec<Digest32> = members.iter().map(leaf_hash).collect();

        for empty_sibling in empty.iter().take(usize::from(depth)) {
            level = level
                .chunks(2)
                .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(empty_sibling)))
                .collect();
        }

        let root = level.first().unwrap_or(&empty[usize::from(depth)]);

        Ok(decimal::be_bytes_to_decimal(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(values: &[&str]) -> Vec<Commitment> {
        values
            .iter()
            .map(|v| Commitment::parse(v).expect("valid commitment"))
            .collect()
    }

    #[test]
    fn empty_tree_uses_the_precomputed_root() {
        assert_eq!(
            Sha256MerkleRoot.compute_root(&[], 20),
            Sha256MerkleRoot::empty_root(20),
            "an empty member list hashes to the empty-subtree root"
        );
        assert_ne!(
            Sha256MerkleRoot::empty_root(20),
            Sha256MerkleRoot::empty_root(21),
            "the depth is part of the root"
        );
    }

    #[test]
    fn root_matches_a_hand_built_tree() {
        // depth 2: four leaves, two of them empty
        let a = Commitment::parse("42").expect("valid commitment");
        let b = Commitment::parse("7").expect("valid commitment");
        let empty = [0u8; 32];

        let left = node_hash(&leaf_hash(&a), &leaf_hash(&b));
        let right = node_hash(&empty, &empty);
        let expected = decimal::be_bytes_to_decimal(&node_hash(&left, &right));

        assert_eq!(
            Sha256MerkleRoot.compute_root(&[a, b], 2),
            Ok(expected),
            "root should match the tree built by hand"
        );
    }

    #[test]
    fn order_matters() {
        let forward = Sha256MerkleRoot.compute_root(&members(&["1", "2"]), 4);
        let backward = Sha256MerkleRoot.compute_root(&members(&["2", "1"]), 4);

        assert_ne!(forward, backward, "members are positional");
    }

    #[test]
    fn capacity_is_enforced() {
        assert!(
            Sha256MerkleRoot
                .compute_root(&members(&["1", "2", "3", "4"]), 2)
                .is_ok(),
            "a full tree is fine"
        );
        assert_eq!(
            Sha256MerkleRoot.compute_root(&members(&["1", "2", "3", "4", "5"]), 2),
            Err(ValidationError::TreeFull { capacity: 4 }),
            "an overfull tree is refused"
        );
    }

    #[test]
    fn unsupported_depths_are_refused() {
        assert_eq!(
            Sha256MerkleRoot.compute_root(&[], 0),
            Err(ValidationError::UnsupportedDepth(0)),
            "depth zero"
        );
        assert_eq!(
            Sha256MerkleRoot.compute_root(&[], 33),
            Err(ValidationError::UnsupportedDepth(33)),
            "depth above the maximum"
        );
    }
}
