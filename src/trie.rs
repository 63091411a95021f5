//! Character-indexed key/value trie with a content hash over its structure.
//!
//! The root hash is a pure function of the whole node graph. It is recomputed
//! from scratch after every `put` and `delete`, which costs O(total nodes) per
//! write. That is the reference semantics; an incremental scheme is only
//! acceptable if it yields the same root hash.

use crate::crypto::sha256_hex;
use crate::error::ChainError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: DeserializeOwned"))]
pub struct TrieNode<V> {
    pub value: Option<V>,
    pub children: BTreeMap<char, TrieNode<V>>,
}

impl<V> Default for TrieNode<V> {
    fn default() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

impl<V> TrieNode<V> {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    fn count_values(&self) -> usize {
        self.value.is_some() as usize + self.children.values().map(TrieNode::count_values).sum::<usize>()
    }
}

#[derive(Debug, Clone)]
pub struct KeyedTrie<V> {
    head: TrieNode<V>,
    root_hash: String,
}

impl<V> KeyedTrie<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        let head = TrieNode::default();
        // An empty node always serializes.
        let root_hash = Self::hash_node(&head).unwrap_or_default();
        Self { head, root_hash }
    }

    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.head.count_values()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut node = &self.head;
        for character in key.chars() {
            node = node.children.get(&character)?;
        }
        node.value.clone()
    }

    pub fn put(&mut self, key: &str, value: V) -> Result<(), ChainError> {
        let mut node = &mut self.head;
        for character in key.chars() {
            node = node.children.entry(character).or_default();
        }
        node.value = Some(value);
        self.generate_root_hash()
    }

    /// Removes the value under `key`, pruning ancestors left without a value
    /// or children. Returns whether a value was removed.
    pub fn delete(&mut self, key: &str) -> Result<bool, ChainError> {
        let chars: Vec<char> = key.chars().collect();
        let removed = Self::delete_from(&mut self.head, &chars);
        if removed {
            self.generate_root_hash()?;
        }
        Ok(removed)
    }

    fn delete_from(node: &mut TrieNode<V>, key: &[char]) -> bool {
        let Some((first, rest)) = key.split_first() else {
            return node.value.take().is_some();
        };

        let Some(child) = node.children.get_mut(first) else {
            return false;
        };
        let removed = Self::delete_from(child, rest);
        if removed && child.is_empty() {
            node.children.remove(first);
        }
        removed
    }

    fn generate_root_hash(&mut self) -> Result<(), ChainError> {
        self.root_hash = Self::hash_node(&self.head)?;
        Ok(())
    }

    fn hash_node(node: &TrieNode<V>) -> Result<String, ChainError> {
        let encoded = serde_json::to_vec(node)?;
        Ok(sha256_hex(encoded))
    }
}

impl<V> Default for KeyedTrie<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}
