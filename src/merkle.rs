//! # Merkle Tree
//!
//! Pairwise SHA-256 tree over an ordered list of leaves.
//!
//! # Algorithm
//!
//! 1. Hash every leaf: `sha256_hex(leaf)`
//! 2. Pair adjacent hashes, duplicating the last one on odd levels
//! 3. Parent = `sha256_hex(left_hex || right_hex)`
//! 4. Repeat until one hash (the root) remains
//!
//! An empty tree has the root `sha256_hex("")`.

use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<String>,
    root: String,
}

impl MerkleTree {
    pub fn new<L: AsRef<[u8]>>(leaves: &[L]) -> Self {
        let leaves: Vec<String> = leaves.iter().map(|leaf| sha256_hex(leaf)).collect();
        let root = Self::build_root(&leaves);
        Self { leaves, root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Every level from the leaf hashes up to the root.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut level = self.leaves.clone();
        let mut levels = vec![level.clone()];
        while level.len() > 1 {
            level = Self::next_level(&level);
            levels.push(level.clone());
        }
        levels
    }

    /// Sibling path from the first occurrence of `leaf` to the root, or
    /// `None` when the leaf is not in the tree.
    pub fn generate_proof(&self, leaf: impl AsRef<[u8]>) -> Option<Vec<ProofStep>> {
        let target = sha256_hex(leaf);
        let mut index = self.leaves.iter().position(|h| *h == target)?;

        let mut proof = Vec::new();
        let mut level = self.leaves.clone();
        while level.len() > 1 {
            let step = if index % 2 == 0 {
                let sibling = level.get(index + 1).unwrap_or(&level[index]);
                ProofStep {
                    hash: sibling.clone(),
                    position: Position::Right,
                }
            } else {
                ProofStep {
                    hash: level[index - 1].clone(),
                    position: Position::Left,
                }
            };
            proof.push(step);

            level = Self::next_level(&level);
            index /= 2;
        }

        Some(proof)
    }

    pub fn verify_proof(leaf: impl AsRef<[u8]>, proof: &[ProofStep], root: &str) -> bool {
        let mut current = sha256_hex(leaf);
        for step in proof {
            current = match step.position {
                Position::Left => hash_pair(&step.hash, &current),
                Position::Right => hash_pair(&current, &step.hash),
            };
        }
        current == root
    }

    fn build_root(leaves: &[String]) -> String {
        if leaves.is_empty() {
            return sha256_hex("");
        }
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            level = Self::next_level(&level);
        }
        level.swap_remove(0)
    }

    fn next_level(level: &[String]) -> Vec<String> {
        level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect()
    }
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut joined = String::with_capacity(left.len() + right.len());
    joined.push_str(left);
    joined.push_str(right);
    sha256_hex(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tx-{}", i)).collect()
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let tree = MerkleTree::new(&["only"]);
        assert_eq!(tree.root(), sha256_hex("only"));
        assert_eq!(tree.generate_proof("only"), Some(vec![]));
        assert!(MerkleTree::verify_proof("only", &[], tree.root()));
    }

    #[test]
    fn test_two_leaves() {
        let tree = MerkleTree::new(&["a", "b"]);
        let expected = hash_pair(&sha256_hex("a"), &sha256_hex("b"));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        let tree = MerkleTree::new(&["a", "b", "c"]);
        let ab = hash_pair(&sha256_hex("a"), &sha256_hex("b"));
        let cc = hash_pair(&sha256_hex("c"), &sha256_hex("c"));
        assert_eq!(tree.root(), hash_pair(&ab, &cc));
    }

    #[test]
    fn test_every_leaf_proof_verifies() {
        for n in 1..=9 {
            let items = leaves(n);
            let tree = MerkleTree::new(&items);
            for item in &items {
                let proof = tree.generate_proof(item).unwrap();
                assert!(
                    MerkleTree::verify_proof(item, &proof, tree.root()),
                    "proof failed for {} in tree of {}",
                    item,
                    n
                );
            }
        }
    }

    #[test]
    fn test_proof_rejects_other_leaf_and_root() {
        let items = leaves(5);
        let tree = MerkleTree::new(&items);
        let proof = tree.generate_proof(&items[2]).unwrap();
        assert!(!MerkleTree::verify_proof(&items[3], &proof, tree.root()));
        assert!(!MerkleTree::verify_proof(&items[2], &proof, &sha256_hex("bogus")));
    }

    #[test]
    fn test_unknown_leaf_has_no_proof() {
        let tree = MerkleTree::new(&leaves(4));
        assert!(tree.generate_proof("missing").is_none());
    }

    #[test]
    fn test_mutating_a_leaf_changes_root() {
        let items = leaves(6);
        let original = MerkleTree::new(&items);
        for i in 0..items.len() {
            let mut changed = items.clone();
            changed[i] = format!("{}-tampered", changed[i]);
            assert_ne!(MerkleTree::new(&changed).root(), original.root());
        }
    }

    #[test]
    fn test_levels_end_at_root() {
        let tree = MerkleTree::new(&leaves(5));
        let levels = tree.levels();
        assert_eq!(levels.iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 3, 2, 1]);
        assert_eq!(levels.last().unwrap()[0], tree.root());
    }

    #[test]
    fn test_empty_tree_root() {
        let tree = MerkleTree::new::<&str>(&[]);
        assert_eq!(tree.root(), sha256_hex(""));
        assert_eq!(tree.levels(), vec![Vec::<String>::new()]);
    }
}
